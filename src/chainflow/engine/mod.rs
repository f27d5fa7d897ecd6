// SPDX-License-Identifier: MIT

//! Execution engine
//!
//! This module provides:
//! - `Engine` - walks units through the graph, runs command tasks within a
//!   bounded number of slots and handles operator decisions
//! - `UnitState` / `UnitSnapshot` - the per-unit state machine and its view
//! - `UnitEvent` - lifecycle notifications

mod events;
mod executor;
mod unit;

pub use events::UnitEvent;
pub use executor::Engine;
pub use unit::{
    FailureReason, PendingDecision, StepRecord, UnitContext, UnitSnapshot, UnitState,
};
