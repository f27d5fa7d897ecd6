// SPDX-License-Identifier: MIT

use serde::Serialize;

use super::unit::FailureReason;
use crate::chainflow::graph::DecisionOptions;

/// Lifecycle notifications published by the engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UnitEvent {
    Started {
        unit: String,
        chain: String,
    },
    LinkEntered {
        unit: String,
        link: String,
        group: String,
    },
    AwaitingChoice {
        unit: String,
        link: String,
        options: DecisionOptions,
    },
    Resumed {
        unit: String,
        link: String,
        decision: String,
    },
    Completed {
        unit: String,
    },
    Failed {
        unit: String,
        reason: FailureReason,
    },
}

impl UnitEvent {
    pub fn unit(&self) -> &str {
        match self {
            UnitEvent::Started { unit, .. }
            | UnitEvent::LinkEntered { unit, .. }
            | UnitEvent::AwaitingChoice { unit, .. }
            | UnitEvent::Resumed { unit, .. }
            | UnitEvent::Completed { unit }
            | UnitEvent::Failed { unit, .. } => unit,
        }
    }
}
