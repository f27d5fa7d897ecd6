// SPDX-License-Identifier: MIT

//! Chain configuration: YAML types, loading, and engine settings

pub mod loader;
pub mod settings;
pub mod types;

pub use loader::ConfigLoader;
pub use settings::EngineSettings;
pub use types::{
    ChainDef, ChoiceDef, ConfigBatch, ConfigDocument, ContentTypeDef, LinkDef, TaskDef, TaskKind,
    TransitionDef, WatchedLocationDef,
};
