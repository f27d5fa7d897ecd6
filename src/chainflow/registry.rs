// SPDX-License-Identifier: MIT

//! Process-wide graph registry
//!
//! Holds the installed configuration batches and the graph compiled from
//! them. Every change recompiles the whole candidate set and swaps the
//! snapshot in one step, so readers see either the old graph or the new one.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::chainflow::config::settings::EngineSettings;
use crate::chainflow::config::types::ConfigBatch;
use crate::chainflow::graph::{compile, ChainGraph};
use crate::runtime::error::{ChainResult, ConfigError};

struct RegistryState {
    batches: Vec<ConfigBatch>,
    current: Arc<ChainGraph>,
}

#[derive(Clone)]
pub struct GraphRegistry {
    state: Arc<RwLock<RegistryState>>,
    settings: Arc<EngineSettings>,
}

impl GraphRegistry {
    pub fn new(settings: EngineSettings) -> Self {
        let empty = ChainGraph::empty(settings.failure_link.clone());
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                batches: Vec::new(),
                current: Arc::new(empty),
            })),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The graph new units start on
    pub async fn snapshot(&self) -> Arc<ChainGraph> {
        self.state.read().await.current.clone()
    }

    pub async fn batch_names(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.batches.iter().map(|b| b.name.clone()).collect()
    }

    /// Install one batch; returns the new graph version
    pub async fn install(&self, batch: ConfigBatch) -> ChainResult<u64> {
        self.install_all(vec![batch]).await
    }

    /// Install several batches as one unit: all of them or none
    pub async fn install_all(&self, batches: Vec<ConfigBatch>) -> ChainResult<u64> {
        let mut state = self.state.write().await;

        let mut candidate = state.batches.clone();
        for batch in batches {
            if candidate.iter().any(|b| b.name == batch.name) {
                return Err(ConfigError::duplicate("batch", &batch.name).into());
            }
            candidate.push(batch);
        }

        let version = state.current.version() + 1;
        let graph = compile(&candidate, &self.settings, version).map_err(|e| {
            log::error!("Rejected configuration: {}", e);
            e
        })?;

        log::info!(
            "Installed graph v{} ({} batches, {} links, {} chains)",
            version,
            candidate.len(),
            graph.links().len(),
            graph.chains().len()
        );
        state.batches = candidate;
        state.current = Arc::new(graph);
        Ok(version)
    }

    /// Remove a batch; rejected if anything left behind still references it
    pub async fn unload(&self, name: &str) -> ChainResult<u64> {
        let mut state = self.state.write().await;

        if !state.batches.iter().any(|b| b.name == name) {
            return Err(ConfigError::UnknownBatch(name.to_string()).into());
        }
        let candidate: Vec<ConfigBatch> = state
            .batches
            .iter()
            .filter(|b| b.name != name)
            .cloned()
            .collect();

        let version = state.current.version() + 1;
        let graph = compile(&candidate, &self.settings, version)?;

        log::info!("Unloaded batch '{}', graph now v{}", name, version);
        state.batches = candidate;
        state.current = Arc::new(graph);
        Ok(version)
    }
}
