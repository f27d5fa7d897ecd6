// SPDX-License-Identifier: MIT

//! Configuration loader - YAML file loading and parsing

use super::types::{ConfigBatch, ConfigDocument};
use crate::runtime::error::{ChainResult, ConfigError};
use std::fs;
use std::path::Path;

/// Loads configuration documents from YAML files
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a configuration document from a YAML file
    pub fn load_document<P: AsRef<Path>>(&self, path: P) -> ChainResult<ConfigDocument> {
        let path = path.as_ref();
        log::info!("Loading chain configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a configuration document from a YAML string
    pub fn parse_yaml(content: &str) -> ChainResult<ConfigDocument> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Parse a single batch, for callers that install batches one at a time
    pub fn parse_batch(content: &str) -> ChainResult<ConfigBatch> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::error::ChainError;
    use std::io::Write;

    #[test]
    fn test_parse_document() {
        let yaml = r#"
settings:
  failure_link: fail-here
batches:
  - name: base
    links:
      - id: a
        group: Start
        default_next: fail-here
    chains:
      - id: main
        starting_link: a
"#;
        let doc = ConfigLoader::parse_yaml(yaml).unwrap();
        assert_eq!(doc.settings.failure_link, "fail-here");
        assert_eq!(doc.batches.len(), 1);
        assert_eq!(doc.batches[0].links[0].group, "Start");
        assert_eq!(doc.batches[0].chains[0].starting_link, "a");
    }

    #[test]
    fn test_parse_batch() {
        let batch = ConfigLoader::parse_batch("name: extra\nlinks: []\n").unwrap();
        assert_eq!(batch.name, "extra");
        assert!(batch.links.is_empty());
    }

    #[test]
    fn test_invalid_yaml_returns_parse_error() {
        let yaml = r#"
batches:
  - links: "not a list"
"#;
        let result = ConfigLoader::parse_yaml(yaml);
        assert!(matches!(
            result,
            Err(ChainError::Config(ConfigError::Parse(_)))
        ));
    }

    #[test]
    fn test_load_document_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batches:\n  - name: from-file").unwrap();

        let doc = ConfigLoader::new().load_document(file.path()).unwrap();
        assert_eq!(doc.batches[0].name, "from-file");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ConfigLoader::new().load_document("/nonexistent/chains.yaml");
        assert!(matches!(result, Err(ChainError::Io(_))));
    }
}
