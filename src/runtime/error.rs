// SPDX-License-Identifier: MIT

//! Typed error handling for chainflow-rs
//!
//! `ChainError` is the error returned by every fallible public operation.
//! Configuration problems are grouped under `ConfigError` so a rejected
//! batch can report exactly which reference or key was at fault.

use thiserror::Error;

/// Top-level error type for chainflow-rs
#[derive(Debug, Error)]
pub enum ChainError {
    /// A configuration batch was rejected at load time
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A running unit produced a status with no transition and no default
    #[error("Unresolved transition at link '{link}' for status {status}")]
    UnresolvedTransition { link: String, status: String },

    /// The executable behind a command task could not be started
    #[error("External task '{command}' failed to start: {message}")]
    ExternalTask { command: String, message: String },

    /// No unit with this identifier is known to the engine
    #[error("Unit '{0}' not found")]
    UnknownUnit(String),

    /// No chain with this identifier exists in the graph
    #[error("Chain '{0}' not found")]
    UnknownChain(String),

    /// A unit with this identifier is already known to the engine
    #[error("Unit '{0}' already exists")]
    DuplicateUnit(String),

    /// A caller-supplied unit identifier that is not a plain name
    #[error("Invalid unit id '{0}'")]
    InvalidUnitId(String),

    /// The requested operation does not apply to the unit's current state
    #[error("Unit '{unit}' is {state}, cannot {action}")]
    InvalidState {
        unit: String,
        state: String,
        action: String,
    },

    /// A selection named something that was not among the offered options
    #[error("'{option}' is not an option for unit '{unit}' at link '{link}'")]
    NotAnOption {
        unit: String,
        link: String,
        option: String,
    },

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

/// Errors detected while validating a configuration batch
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// An entity refers to something that does not exist
    #[error("{kind} '{from}' references unknown {target_kind} '{target}'")]
    DanglingReference {
        kind: &'static str,
        from: String,
        target_kind: &'static str,
        target: String,
    },

    /// Two entities of the same kind share an identifier
    #[error("Duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    /// More than one transition for the same (link, status) key
    #[error("Duplicate transition for link '{link}' and status {status}")]
    DuplicateTransition { link: String, status: String },

    /// A chain whose starting link does not exist
    #[error("Chain '{chain}' has missing starting link '{link}'")]
    MissingStartingLink { chain: String, link: String },

    /// A link was defined with the failure sentinel's identifier
    #[error("Link id '{0}' is reserved for the failure sentinel")]
    SentinelRedefined(String),

    /// A link references a task that cannot be executed at a link
    #[error("Link '{link}' cannot run task '{task}': {reason}")]
    InvalidTaskReference {
        link: String,
        task: String,
        reason: String,
    },

    /// Unloading a batch that was never installed
    #[error("Batch '{0}' is not installed")]
    UnknownBatch(String),

    /// The configuration text itself could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ChainError {
    /// Create an unresolved transition error
    pub fn unresolved(link: impl Into<String>, status: impl ToString) -> Self {
        Self::UnresolvedTransition {
            link: link.into(),
            status: status.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(
        unit: impl Into<String>,
        state: impl ToString,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            unit: unit.into(),
            state: state.to_string(),
            action: action.into(),
        }
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl ConfigError {
    pub fn dangling(
        kind: &'static str,
        from: impl Into<String>,
        target_kind: &'static str,
        target: impl Into<String>,
    ) -> Self {
        Self::DanglingReference {
            kind,
            from: from.into(),
            target_kind,
            target: target.into(),
        }
    }

    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            kind,
            id: id.into(),
        }
    }
}

impl From<&str> for ChainError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for ChainError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

/// Result alias used across the crate
pub type ChainResult<T> = Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_wraps_into_chain_error() {
        let err: ChainError = ConfigError::duplicate("link", "a").into();
        assert!(matches!(err, ChainError::Config(ConfigError::DuplicateId { .. })));
        assert_eq!(
            err.to_string(),
            "Configuration error: Duplicate link id 'a'"
        );
    }

    #[test]
    fn test_dangling_reference_message() {
        let err = ConfigError::dangling("chain", "ch1", "link", "missing");
        assert_eq!(
            err.to_string(),
            "chain 'ch1' references unknown link 'missing'"
        );
    }

    #[test]
    fn test_unresolved_message() {
        let err = ChainError::unresolved("a", "failure");
        assert_eq!(
            err.to_string(),
            "Unresolved transition at link 'a' for status failure"
        );
    }
}
