// SPDX-License-Identifier: MIT

//! Workflow chain engine
//!
//! - `config` - YAML configuration and engine settings
//! - `graph` - the compiled, immutable chain graph
//! - `registry` - installed batches and the current graph snapshot
//! - `state` - per-unit variables and durable decision records
//! - `engine` - the unit state machine and executor
//! - `server` - HTTP decision surface

pub mod config;
pub mod engine;
pub mod graph;
pub mod registry;
pub mod server;
pub mod state;

pub use config::{ConfigLoader, EngineSettings};
pub use engine::{Engine, UnitContext, UnitEvent, UnitSnapshot, UnitState};
pub use registry::GraphRegistry;
