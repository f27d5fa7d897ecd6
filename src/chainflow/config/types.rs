// SPDX-License-Identifier: MIT

//! YAML schema types for chain configuration
//!
//! A configuration document holds optional engine settings and a list of
//! batches. Each batch is installed atomically; later batches may refer to
//! entities installed by earlier ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::settings::EngineSettings;
use crate::chainflow::graph::status::{ExitStatus, JobStatus};

/// Top-level configuration document
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ConfigDocument {
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub batches: Vec<ConfigBatch>,
}

/// A set of graph entities installed or removed as a whole
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ConfigBatch {
    pub name: String,
    #[serde(default)]
    pub content_types: Vec<ContentTypeDef>,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
    #[serde(default)]
    pub links: Vec<LinkDef>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
    #[serde(default)]
    pub chains: Vec<ChainDef>,
    #[serde(default)]
    pub choices: Vec<ChoiceDef>,
    #[serde(default)]
    pub watched_locations: Vec<WatchedLocationDef>,
}

/// Kind of content a watched location expects
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContentTypeDef {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// A task definition, referenced by links through its id
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskDef {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: TaskKind,
}

/// The task variants
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run an external executable with templated arguments
    Command {
        execute: String,
        #[serde(default)]
        arguments: String,
    },
    /// Bind a unit variable to a value and/or a link
    SetVariable {
        variable: String,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        link: Option<String>,
    },
    /// Redirect to the link bound to a unit variable
    PullVariable {
        variable: String,
        #[serde(default)]
        default_link: Option<String>,
    },
    /// A set of placeholder values offered to an operator at a link
    ///
    /// The task's `description` is what the operator sees.
    ReplacementDictionaryChoice {
        available_at: String,
        #[serde(default)]
        replacements: BTreeMap<String, String>,
    },
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Command { .. } => "command",
            TaskKind::SetVariable { .. } => "set_variable",
            TaskKind::PullVariable { .. } => "pull_variable",
            TaskKind::ReplacementDictionaryChoice { .. } => "replacement_dictionary_choice",
        }
    }
}

/// A node of the workflow graph
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LinkDef {
    pub id: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default = "JobStatus::link_default")]
    pub default_exit_message: JobStatus,
    #[serde(default)]
    pub default_next: Option<String>,
}

/// Override of a link's default transition for one exit status
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransitionDef {
    #[serde(default)]
    pub id: Option<String>,
    pub link: String,
    #[serde(default = "success_status")]
    pub status: ExitStatus,
    pub next: String,
    #[serde(default = "JobStatus::transition_default")]
    pub exit_message: JobStatus,
}

fn success_status() -> ExitStatus {
    ExitStatus::Success
}

/// A named entry point into the graph
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainDef {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub starting_link: String,
}

/// One chain offered to an operator at a link
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChoiceDef {
    pub id: String,
    pub link: String,
    pub chain: String,
}

/// Where new content appears and which chain processes it
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchedLocationDef {
    #[serde(default)]
    pub id: Option<String>,
    pub path: String,
    pub expected_type: String,
    pub chain: String,
    #[serde(default)]
    pub unit_type: Option<String>,
}
