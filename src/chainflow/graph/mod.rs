// SPDX-License-Identifier: MIT

//! In-memory workflow graph
//!
//! This module provides the compiled, immutable graph that the engine walks:
//! - `ChainGraph` - link table, exit-status transitions, chains
//! - choice and trigger registries as queries on the graph
//! - `compile` - validation of configuration batches

pub mod choices;
pub mod compiler;
pub mod status;
pub mod table;
mod triggers;
pub mod types;

pub use choices::{ChainOption, DecisionOptions, DictionaryOption};
pub use compiler::compile;
pub use status::{ExitStatus, JobStatus};
pub use table::ChainGraph;
pub use types::{LinkIndex, Resolution, ResolvedBy, Target, TaskAction};
