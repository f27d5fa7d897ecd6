// SPDX-License-Identifier: MIT

//! Engine settings
//!
//! Settings come from the `settings` section of the configuration document
//! and can be overridden through `CHAINFLOW_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_FAILURE_LINK: &str = "default-failure";

/// Runtime settings for the engine
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Identifier that stands for the terminal failure state
    pub failure_link: String,
    /// Expanded for `%watchDirectoryPath%` in watched location paths
    pub watch_directory_path: String,
    /// Expanded for `%sharedPath%` in watched location paths
    pub shared_path: String,
    /// Number of command tasks allowed to run at once across all units
    pub max_concurrent_tasks: usize,
    /// Directory for awaiting-input records; none means in-memory only
    pub state_dir: Option<PathBuf>,
    /// Where bare command names are looked up before `PATH`
    pub script_dir: Option<PathBuf>,
    /// How long a unit may wait for a decision before it is failed
    pub decision_timeout_secs: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            failure_link: DEFAULT_FAILURE_LINK.to_string(),
            watch_directory_path: "/var/archivematica/sharedDirectory/watchedDirectories/"
                .to_string(),
            shared_path: "/var/archivematica/sharedDirectory/".to_string(),
            max_concurrent_tasks: 4,
            state_dir: None,
            script_dir: None,
            decision_timeout_secs: None,
        }
    }
}

impl EngineSettings {
    /// Apply `CHAINFLOW_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHAINFLOW_FAILURE_LINK") {
            self.failure_link = v;
        }
        if let Some(v) = lookup("CHAINFLOW_WATCH_DIRECTORY") {
            self.watch_directory_path = v;
        }
        if let Some(v) = lookup("CHAINFLOW_SHARED_PATH") {
            self.shared_path = v;
        }
        if let Some(v) = lookup("CHAINFLOW_MAX_CONCURRENT_TASKS") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.max_concurrent_tasks = n,
                _ => log::warn!("Ignoring invalid CHAINFLOW_MAX_CONCURRENT_TASKS: {}", v),
            }
        }
        if let Some(v) = lookup("CHAINFLOW_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CHAINFLOW_SCRIPT_DIR") {
            self.script_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CHAINFLOW_DECISION_TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(secs) => self.decision_timeout_secs = Some(secs),
                Err(_) => log::warn!("Ignoring invalid CHAINFLOW_DECISION_TIMEOUT_SECS: {}", v),
            }
        }
        self
    }

    pub fn decision_timeout(&self) -> Option<Duration> {
        self.decision_timeout_secs.map(Duration::from_secs)
    }

    /// Expand settings placeholders in a watched location path
    pub fn expand_path(&self, path: &str) -> String {
        path.replace("%watchDirectoryPath%", &self.watch_directory_path)
            .replace("%sharedPath%", &self.shared_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_section_missing() {
        let settings: EngineSettings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.failure_link, DEFAULT_FAILURE_LINK);
        assert!(settings.decision_timeout().is_none());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("CHAINFLOW_FAILURE_LINK", "61c316a6"),
            ("CHAINFLOW_MAX_CONCURRENT_TASKS", "0"),
            ("CHAINFLOW_DECISION_TIMEOUT_SECS", "30"),
        ]
        .into_iter()
        .collect();

        let settings =
            EngineSettings::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.failure_link, "61c316a6");
        // Zero slots would deadlock every command, so it is ignored
        assert_eq!(settings.max_concurrent_tasks, 4);
        assert_eq!(settings.decision_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_expand_path() {
        let settings = EngineSettings {
            watch_directory_path: "/watch/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.expand_path("%watchDirectoryPath%activeTransfers/dataverseTransfer"),
            "/watch/activeTransfers/dataverseTransfer"
        );
    }
}
