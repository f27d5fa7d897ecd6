// SPDX-License-Identifier: MIT

//! Runtime building blocks that know nothing about the chain graph
//!
//! - `error` - the crate's error types
//! - `runner` - the `TaskRunner` seam and the child-process implementation
//! - `template` - argument splitting and placeholder substitution

pub mod error;
pub mod runner;
pub mod template;

pub use error::{ChainError, ChainResult, ConfigError};
pub use runner::{CommandInvocation, ProcessRunner, TaskRunner};
