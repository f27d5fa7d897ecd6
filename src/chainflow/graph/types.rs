// SPDX-License-Identifier: MIT

//! Compiled graph entities
//!
//! Entities live in arenas owned by `ChainGraph` and refer to each other by
//! index. Identifiers from configuration are kept for display and lookup.

use serde::Serialize;
use std::collections::BTreeMap;

use super::status::{ExitStatus, JobStatus};

pub type LinkIndex = usize;
pub type TaskIndex = usize;
pub type ChainIndex = usize;
pub type DictionaryIndex = usize;

/// Where a transition leads
///
/// `Failed` is the terminal failure state. It is not a link, so nothing can
/// transition out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Target {
    Link(LinkIndex),
    Failed,
}

/// A compiled task
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub description: Option<String>,
    pub action: TaskAction,
}

/// What the engine does when a link's task runs
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAction {
    Command {
        execute: String,
        arguments: String,
    },
    SetVariable {
        variable: String,
        value: Option<String>,
        link: Option<Target>,
    },
    PullVariable {
        variable: String,
        default_link: Option<Target>,
    },
}

/// One exit-status override on a link
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub target: Target,
    pub exit_message: JobStatus,
}

/// A chain offered at a link, in registration order
#[derive(Debug, Clone)]
pub struct ChoiceEntry {
    pub id: String,
    pub sequence: usize,
    pub chain: ChainIndex,
}

/// A node of the compiled graph
#[derive(Debug, Clone)]
pub struct Link {
    pub id: String,
    pub group: String,
    pub task: Option<TaskIndex>,
    pub default_exit_message: JobStatus,
    pub default_next: Option<Target>,
    pub transitions: BTreeMap<ExitStatus, Transition>,
    pub choices: Vec<ChoiceEntry>,
    pub dictionaries: Vec<DictionaryIndex>,
}

impl Link {
    /// Whether reaching this link suspends the unit for an operator decision
    pub fn has_options(&self) -> bool {
        !self.choices.is_empty() || !self.dictionaries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Chain {
    pub id: String,
    pub description: String,
    pub starting_link: LinkIndex,
}

/// A replacement dictionary offered at a link
#[derive(Debug, Clone)]
pub struct ReplacementDictionary {
    pub id: String,
    pub description: String,
    pub link: LinkIndex,
    pub sequence: usize,
    pub replacements: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ContentType {
    pub id: String,
    pub description: String,
}

/// A trigger registration with its path already expanded
#[derive(Debug, Clone)]
pub struct WatchedLocation {
    pub id: Option<String>,
    pub path: String,
    pub expected_type: String,
    pub chain: ChainIndex,
    pub unit_type: Option<String>,
}

/// How `resolve_next` arrived at its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Transition,
    DefaultNext,
    Unresolved,
}

/// The result of resolving a link's next step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub target: Target,
    pub exit_message: JobStatus,
    pub resolved_by: ResolvedBy,
}
