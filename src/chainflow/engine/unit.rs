// SPDX-License-Identifier: MIT

//! Processing units and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::chainflow::graph::{ChainGraph, DecisionOptions, ExitStatus, JobStatus, LinkIndex};
use crate::chainflow::state::{AwaitingInputRecord, UnitVariables};

/// Lifecycle states of a processing unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Queued,
    Running,
    AwaitingChoice,
    Completed,
    Failed,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Completed | UnitState::Failed)
    }

    /// Nothing will happen to the unit until someone acts on it
    pub fn is_at_rest(&self) -> bool {
        matches!(
            self,
            UnitState::AwaitingChoice | UnitState::Completed | UnitState::Failed
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Queued => "queued",
            UnitState::Running => "running",
            UnitState::AwaitingChoice => "awaiting choice",
            UnitState::Completed => "completed",
            UnitState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// What the caller knows about a unit when starting it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitContext {
    /// Identifier to use; a v4 UUID is generated when absent
    #[serde(default)]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub unit_type: Option<String>,
    /// Extra placeholder values for command arguments
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl UnitContext {
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Why a unit ended in `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// A transition led to the failure sentinel
    FailureLink { link: String },
    /// No transition and no default next for the status
    UnresolvedTransition { link: String, status: String },
    /// A terminal link whose exit message is `failed`
    TerminalLink { link: String },
    /// Too many redirects without running a task
    RedirectLoop { link: String },
    /// Stopped by an operator
    Aborted,
    /// Nobody decided within the configured timeout
    DecisionTimedOut { link: String },
    /// The awaiting-input record could not be written
    DecisionNotRecorded { link: String, message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::FailureLink { link } => write!(f, "link {} led to failure", link),
            FailureReason::UnresolvedTransition { link, status } => {
                write!(f, "no transition from {} for status {}", link, status)
            }
            FailureReason::TerminalLink { link } => write!(f, "ended at failed link {}", link),
            FailureReason::RedirectLoop { link } => write!(f, "redirect loop at {}", link),
            FailureReason::Aborted => write!(f, "aborted by operator"),
            FailureReason::DecisionTimedOut { link } => {
                write!(f, "decision at {} timed out", link)
            }
            FailureReason::DecisionNotRecorded { link, message } => {
                write!(f, "decision at {} not recorded: {}", link, message)
            }
        }
    }
}

/// Whether `id` can name a unit
///
/// Ids double as record file names, so they must be one plain path
/// component.
pub(crate) fn is_plain_unit_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.starts_with('.')
        && !id.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

/// One entry in a unit's history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub link: String,
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub at: DateTime<Utc>,
}

/// A decision the unit is waiting on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingDecision {
    pub link: String,
    pub group: String,
    pub options: DecisionOptions,
    pub since: DateTime<Utc>,
}

/// Read-only view of a unit
#[derive(Debug, Clone, Serialize)]
pub struct UnitSnapshot {
    pub id: String,
    pub name: String,
    pub path: Option<PathBuf>,
    pub unit_type: Option<String>,
    pub chain: String,
    pub state: UnitState,
    pub current_link: Option<String>,
    pub graph_version: u64,
    pub variables: UnitVariables,
    pub history: Vec<StepRecord>,
    pub pending: Option<PendingDecision>,
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UnitSnapshot {
    /// Links visited so far, in order
    pub fn visited_links(&self) -> Vec<&str> {
        self.history.iter().map(|s| s.link.as_str()).collect()
    }
}

/// Mutable unit state, only touched with the handle's lock held
pub(crate) struct Unit {
    pub id: String,
    pub name: String,
    pub path: Option<PathBuf>,
    pub unit_type: Option<String>,
    pub chain_id: String,
    pub graph: Arc<ChainGraph>,
    pub state: UnitState,
    pub current: Option<LinkIndex>,
    pub variables: UnitVariables,
    pub replacements: BTreeMap<String, String>,
    pub history: Vec<StepRecord>,
    pub pending: Option<PendingDecision>,
    pub failure: Option<FailureReason>,
    /// A dictionary was picked at the current link; run its task next
    pub decided: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Unit {
    pub fn new(
        graph: Arc<ChainGraph>,
        chain_id: String,
        starting_link: LinkIndex,
        context: UnitContext,
    ) -> Self {
        let id = context
            .unit_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let name = context
            .name
            .or_else(|| {
                context
                    .path
                    .as_ref()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| id.clone());
        let now = Utc::now();

        Self {
            id,
            name,
            path: context.path,
            unit_type: context.unit_type,
            chain_id,
            graph,
            state: UnitState::Queued,
            current: Some(starting_link),
            variables: UnitVariables::new(),
            replacements: context.variables,
            history: Vec::new(),
            pending: None,
            failure: None,
            decided: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a suspended unit from its durable record
    pub fn from_record(
        graph: Arc<ChainGraph>,
        link: LinkIndex,
        record: AwaitingInputRecord,
    ) -> Self {
        let node = graph.link(link);
        let pending = PendingDecision {
            link: node.id.clone(),
            group: node.group.clone(),
            options: graph.decision_options(link),
            since: record.awaiting_since,
        };
        let now = Utc::now();

        Self {
            id: record.unit_id,
            name: record.name,
            path: record.path,
            unit_type: record.unit_type,
            chain_id: record.chain_id,
            graph,
            state: UnitState::AwaitingChoice,
            current: Some(link),
            variables: record.variables,
            replacements: record.replacements,
            history: Vec::new(),
            pending: Some(pending),
            failure: None,
            decided: false,
            created_at: record.awaiting_since,
            updated_at: now,
        }
    }

    pub fn current_link_id(&self) -> Option<&str> {
        self.current.map(|l| self.graph.link(l).id.as_str())
    }

    /// Placeholder values for command arguments
    ///
    /// Unit placeholders are inserted last and cannot be overridden by
    /// context values or a replacement dictionary.
    pub fn argument_replacements(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = self
            .replacements
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        map.insert("%SIPUUID%".to_string(), self.id.clone());
        map.insert("%unitUUID%".to_string(), self.id.clone());
        map.insert("%SIPName%".to_string(), self.name.clone());
        if let Some(path) = &self.path {
            map.insert("%SIPDirectory%".to_string(), path.display().to_string());
        }
        if let Some(unit_type) = &self.unit_type {
            map.insert("%unitType%".to_string(), unit_type.clone());
        }
        map
    }

    pub fn awaiting_record(&self) -> Option<AwaitingInputRecord> {
        let pending = self.pending.as_ref()?;
        Some(AwaitingInputRecord {
            unit_id: self.id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            unit_type: self.unit_type.clone(),
            chain_id: self.chain_id.clone(),
            link_id: pending.link.clone(),
            graph_version: self.graph.version(),
            variables: self.variables.clone(),
            replacements: self.replacements.clone(),
            awaiting_since: pending.since,
        })
    }

    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            unit_type: self.unit_type.clone(),
            chain: self.chain_id.clone(),
            state: self.state,
            current_link: self.current_link_id().map(str::to_string),
            graph_version: self.graph.version(),
            variables: self.variables.clone(),
            history: self.history.clone(),
            pending: self.pending.clone(),
            failure: self.failure.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Shared handle to one unit
pub(crate) struct UnitHandle {
    pub unit: Mutex<Unit>,
    cancel: AtomicBool,
    state_tx: watch::Sender<UnitState>,
}

impl UnitHandle {
    pub fn new(unit: Unit) -> Self {
        let (state_tx, _) = watch::channel(unit.state);
        Self {
            unit: Mutex::new(unit),
            cancel: AtomicBool::new(false),
            state_tx,
        }
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<UnitState> {
        self.state_tx.subscribe()
    }

    /// Change state; callers hold the unit lock
    pub fn set_state(&self, unit: &mut Unit, state: UnitState) {
        unit.state = state;
        unit.updated_at = Utc::now();
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainflow::config::{ConfigLoader, EngineSettings};
    use crate::chainflow::graph::compile;

    fn graph() -> Arc<ChainGraph> {
        let batch = ConfigLoader::parse_batch(
            "name: t\nlinks:\n  - id: a\nchains:\n  - id: main\n    starting_link: a\n",
        )
        .unwrap();
        Arc::new(compile(&[batch], &EngineSettings::default(), 1).unwrap())
    }

    #[test]
    fn test_state_classes() {
        assert!(UnitState::Completed.is_terminal());
        assert!(UnitState::Failed.is_terminal());
        assert!(!UnitState::AwaitingChoice.is_terminal());
        assert!(UnitState::AwaitingChoice.is_at_rest());
        assert!(!UnitState::Running.is_at_rest());
        assert!(!UnitState::Queued.is_at_rest());
    }

    #[test]
    fn test_name_falls_back_to_path_then_id() {
        let g = graph();
        let unit = Unit::new(
            g.clone(),
            "main".to_string(),
            0,
            UnitContext::for_path("/incoming/dataverse/transfer-7"),
        );
        assert_eq!(unit.name, "transfer-7");

        let unit = Unit::new(g, "main".to_string(), 0, UnitContext::default());
        assert_eq!(unit.name, unit.id);
        assert!(uuid::Uuid::parse_str(&unit.id).is_ok());
    }

    #[test]
    fn test_argument_replacements() {
        let mut ctx = UnitContext::for_path("/incoming/t1");
        ctx.unit_id = Some("u-1".to_string());
        ctx.variables
            .insert("%normalize%".to_string(), "preservation".to_string());
        let unit = Unit::new(graph(), "main".to_string(), 0, ctx);

        let map = unit.argument_replacements();
        assert_eq!(map["%SIPUUID%"], "u-1");
        assert_eq!(map["%SIPName%"], "t1");
        assert_eq!(map["%SIPDirectory%"], "/incoming/t1");
        assert_eq!(map["%normalize%"], "preservation");
    }

    #[test]
    fn test_unit_placeholders_cannot_be_overridden() {
        let mut ctx = UnitContext::for_path("/incoming/t1");
        ctx.unit_id = Some("u-1".to_string());
        for key in ["%SIPUUID%", "%unitUUID%", "%SIPDirectory%"] {
            ctx.variables.insert(key.to_string(), "not-the-unit".to_string());
        }
        let unit = Unit::new(graph(), "main".to_string(), 0, ctx);

        let map = unit.argument_replacements();
        assert_eq!(map["%SIPUUID%"], "u-1");
        assert_eq!(map["%unitUUID%"], "u-1");
        assert_eq!(map["%SIPDirectory%"], "/incoming/t1");
    }

    #[test]
    fn test_plain_unit_ids() {
        assert!(is_plain_unit_id("unit-42"));
        assert!(is_plain_unit_id("987a82d0-5f1c-4c52-9a53-0d1c3f0f1a2b"));
        assert!(!is_plain_unit_id(""));
        assert!(!is_plain_unit_id(".."));
        assert!(!is_plain_unit_id("../escaped"));
        assert!(!is_plain_unit_id("a/b"));
        assert!(!is_plain_unit_id("a\\b"));
        assert!(!is_plain_unit_id(".hidden"));
    }

    #[tokio::test]
    async fn test_set_state_notifies_watchers() {
        let unit = Unit::new(graph(), "main".to_string(), 0, UnitContext::default());
        let handle = UnitHandle::new(unit);
        let mut rx = handle.subscribe();
        assert_eq!(*rx.borrow(), UnitState::Queued);

        {
            let mut unit = handle.unit.lock().await;
            handle.set_state(&mut unit, UnitState::Running);
        }
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), UnitState::Running);
    }
}
