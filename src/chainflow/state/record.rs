// SPDX-License-Identifier: MIT

//! Durable records for units awaiting an operator decision

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::store::UnitVariables;
use crate::runtime::error::ChainResult;

/// Everything needed to resume a suspended unit after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitingInputRecord {
    pub unit_id: String,
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub unit_type: Option<String>,
    pub chain_id: String,
    pub link_id: String,
    pub graph_version: u64,
    #[serde(default)]
    pub variables: UnitVariables,
    #[serde(default)]
    pub replacements: BTreeMap<String, String>,
    pub awaiting_since: DateTime<Utc>,
}

/// One JSON file per suspended unit
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, unit_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", unit_id))
    }

    /// Write the record, replacing any earlier one for the unit
    pub async fn save(&self, record: &AwaitingInputRecord) -> ChainResult<()> {
        fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(record)?;
        // Atomic replace
        let tmp = self.dir.join(format!(".{}.tmp", record.unit_id));
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, self.path_for(&record.unit_id)).await?;
        Ok(())
    }

    pub async fn remove(&self, unit_id: &str) -> ChainResult<()> {
        match fs::remove_file(self.path_for(unit_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable records; unreadable files are logged and skipped
    pub async fn load_all(&self) -> ChainResult<Vec<AwaitingInputRecord>> {
        let mut records = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let content = fs::read(&path).await?;
            match serde_json::from_slice::<AwaitingInputRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| {
            a.awaiting_since
                .cmp(&b.awaiting_since)
                .then_with(|| a.unit_id.cmp(&b.unit_id))
        });
        Ok(records)
    }
}
