// SPDX-License-Identifier: MIT

//! Task runners execute command tasks on behalf of the engine

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::runtime::error::{ChainError, ChainResult};

/// A fully rendered command ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub unit_id: String,
    pub link_id: String,
    pub execute: String,
    pub arguments: Vec<String>,
}

/// Trait for anything that can run a command task.
///
/// `Ok(code)` is the exit code of a process that ran, successful or not.
/// `Err(ChainError::ExternalTask)` means the executable never started.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, invocation: &CommandInvocation) -> ChainResult<i32>;
}

/// Runs commands as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    script_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve bare command names inside `dir` when a file exists there
    pub fn with_script_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.script_dir = dir;
        self
    }

    fn resolve(&self, execute: &str) -> PathBuf {
        if let Some(dir) = &self.script_dir {
            if !execute.contains(std::path::MAIN_SEPARATOR) {
                let candidate = dir.join(execute);
                if candidate.is_file() {
                    return candidate;
                }
            }
        }
        PathBuf::from(execute)
    }
}

#[async_trait]
impl TaskRunner for ProcessRunner {
    async fn run(&self, invocation: &CommandInvocation) -> ChainResult<i32> {
        let program = self.resolve(&invocation.execute);
        log::info!(
            "Unit {} link {}: running {} {:?}",
            invocation.unit_id,
            invocation.link_id,
            program.display(),
            invocation.arguments
        );

        let output = Command::new(&program)
            .args(&invocation.arguments)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ChainError::ExternalTask {
                command: invocation.execute.clone(),
                message: e.to_string(),
            })?;

        if !output.stdout.is_empty() {
            log::debug!(
                "{} stdout: {}",
                invocation.execute,
                String::from_utf8_lossy(&output.stdout).trim_end()
            );
        }
        if !output.stderr.is_empty() {
            log::debug!(
                "{} stderr: {}",
                invocation.execute,
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }

        match output.status.code() {
            Some(code) => Ok(code),
            None => {
                log::warn!(
                    "{} was terminated by a signal, treating as exit code -1",
                    invocation.execute
                );
                Ok(-1)
            }
        }
    }
}
