// SPDX-License-Identifier: MIT

//! Trigger registry: watched locations mapped to the chain they start

use super::table::ChainGraph;
use super::types::{Chain, WatchedLocation};

impl ChainGraph {
    /// The chain to start for content of `content_type` appearing at `path`
    ///
    /// Matching is exact on the expanded path and the content type id.
    pub fn match_trigger(&self, path: &str, content_type: &str) -> Option<&Chain> {
        self.watched_location(path, content_type)
            .map(|location| &self.chains[location.chain])
    }

    /// The watched location registered for `(path, content_type)`
    pub fn watched_location(&self, path: &str, content_type: &str) -> Option<&WatchedLocation> {
        self.triggers
            .get(&(path.to_string(), content_type.to_string()))
            .map(|&index| &self.watched[index])
    }

    pub fn watched_locations(&self) -> &[WatchedLocation] {
        &self.watched
    }
}

#[cfg(test)]
mod tests {
    use crate::chainflow::config::{ConfigLoader, EngineSettings};
    use crate::chainflow::graph::compile;

    #[test]
    fn test_exact_trigger_match() {
        let batch = ConfigLoader::parse_batch(
            r#"
name: triggers
content_types:
  - id: T
    description: Transfer
  - id: U
links:
  - id: start
chains:
  - id: CH
    starting_link: start
watched_locations:
  - path: /incoming/dataverse
    expected_type: T
    chain: CH
    unit_type: Transfer
"#,
        )
        .unwrap();
        let g = compile(&[batch], &EngineSettings::default(), 1).unwrap();

        let location = g.watched_location("/incoming/dataverse", "T").unwrap();
        assert_eq!(location.unit_type.as_deref(), Some("Transfer"));
        assert!(g.watched_location("/incoming/dataverse", "U").is_none());

        assert_eq!(
            g.match_trigger("/incoming/dataverse", "T").map(|c| c.id.as_str()),
            Some("CH")
        );
        assert!(g.match_trigger("/incoming/dataverse", "U").is_none());
        assert!(g.match_trigger("/incoming/dataverse/", "T").is_none());
        assert!(g.match_trigger("/incoming/other", "T").is_none());
    }

    #[test]
    fn test_watch_directory_placeholder_expanded() {
        let batch = ConfigLoader::parse_batch(
            r#"
name: triggers
content_types:
  - id: T
links:
  - id: start
chains:
  - id: CH
    starting_link: start
watched_locations:
  - path: "%watchDirectoryPath%activeTransfers/dataverseTransfer"
    expected_type: T
    chain: CH
"#,
        )
        .unwrap();
        let settings = EngineSettings {
            watch_directory_path: "/watch/".to_string(),
            ..Default::default()
        };
        let g = compile(&[batch], &settings, 1).unwrap();

        assert!(g
            .match_trigger("/watch/activeTransfers/dataverseTransfer", "T")
            .is_some());
        assert_eq!(
            g.watched_locations()[0].path,
            "/watch/activeTransfers/dataverseTransfer"
        );
    }
}
