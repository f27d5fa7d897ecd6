// SPDX-License-Identifier: MIT

//! Per-unit state
//!
//! This module provides:
//! - `UnitVariables` - a unit's private variable namespace
//! - `AwaitingInputRecord` / `RecordStore` - durable records for units
//!   suspended on an operator decision

mod record;
mod store;

pub use record::{AwaitingInputRecord, RecordStore};
pub use store::{UnitVariable, UnitVariables};
