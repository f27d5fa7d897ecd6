// SPDX-License-Identifier: MIT

//! Choice registry: options offered to an operator at a link

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::table::ChainGraph;
use super::types::{Chain, ChainIndex, DictionaryIndex, LinkIndex};

/// A chain the operator may pick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOption {
    pub id: String,
    pub description: String,
}

/// A replacement dictionary the operator may pick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryOption {
    pub id: String,
    pub description: String,
    pub replacements: BTreeMap<String, String>,
}

/// Everything offered at one link
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionOptions {
    pub chains: Vec<ChainOption>,
    pub dictionaries: Vec<DictionaryOption>,
}

impl DecisionOptions {
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty() && self.dictionaries.is_empty()
    }
}

impl ChainGraph {
    /// Chains registered as options at `link`, in registration order
    ///
    /// An empty result means the link transitions automatically.
    pub fn choices_for(&self, link: LinkIndex) -> Vec<&Chain> {
        self.links[link]
            .choices
            .iter()
            .map(|entry| &self.chains[entry.chain])
            .collect()
    }

    /// Index of `chain_id` if it is one of the chains offered at `link`
    pub fn offered_chain(&self, link: LinkIndex, chain_id: &str) -> Option<ChainIndex> {
        self.links[link]
            .choices
            .iter()
            .map(|entry| entry.chain)
            .find(|&c| self.chains[c].id == chain_id)
    }

    /// Index of `dictionary_id` if it is offered at `link`
    pub fn offered_dictionary(&self, link: LinkIndex, dictionary_id: &str) -> Option<DictionaryIndex> {
        self.links[link]
            .dictionaries
            .iter()
            .copied()
            .find(|&d| self.dictionaries[d].id == dictionary_id)
    }

    /// All options at `link` in presentable form
    pub fn decision_options(&self, link: LinkIndex) -> DecisionOptions {
        let node = &self.links[link];
        DecisionOptions {
            chains: self
                .choices_for(link)
                .into_iter()
                .map(|chain| ChainOption {
                    id: chain.id.clone(),
                    description: chain.description.clone(),
                })
                .collect(),
            dictionaries: node
                .dictionaries
                .iter()
                .map(|&d| {
                    let dict = &self.dictionaries[d];
                    DictionaryOption {
                        id: dict.id.clone(),
                        description: dict.description.clone(),
                        replacements: dict.replacements.clone(),
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::chainflow::config::{ConfigLoader, EngineSettings};
    use crate::chainflow::graph::{compile, ChainGraph};

    fn graph() -> ChainGraph {
        let batch = ConfigLoader::parse_batch(
            r#"
name: choices
tasks:
  - id: keep
    description: "Normalize for preservation"
    kind: replacement_dictionary_choice
    available_at: N
    replacements:
      "%normalize%": preservation
links:
  - id: A
  - id: N
  - id: X1
  - id: Y1
  - id: Q
chains:
  - id: X
    description: Approve
    starting_link: X1
  - id: Y
    description: Reject
    starting_link: Y1
choices:
  - id: zz-first
    link: A
    chain: X
  - id: aa-second
    link: A
    chain: Y
"#,
        )
        .unwrap();
        compile(&[batch], &EngineSettings::default(), 1).unwrap()
    }

    #[test]
    fn test_choices_in_registration_order() {
        let g = graph();
        let a = g.link_by_id("A").unwrap();
        let ids: Vec<_> = g.choices_for(a).iter().map(|c| c.id.as_str()).collect();
        // Registration order, not identifier order
        assert_eq!(ids, vec!["X", "Y"]);
    }

    #[test]
    fn test_no_choices_means_automatic() {
        let g = graph();
        let q = g.link_by_id("Q").unwrap();
        assert!(g.choices_for(q).is_empty());
        assert!(g.decision_options(q).is_empty());
        assert!(!g.link(q).has_options());
    }

    #[test]
    fn test_offered_chain() {
        let g = graph();
        let a = g.link_by_id("A").unwrap();
        assert_eq!(g.offered_chain(a, "Y"), g.chain_by_id("Y"));
        assert_eq!(g.offered_chain(g.link_by_id("Q").unwrap(), "Y"), None);
    }

    #[test]
    fn test_dictionary_options() {
        let g = graph();
        let n = g.link_by_id("N").unwrap();
        let options = g.decision_options(n);
        assert!(options.chains.is_empty());
        assert_eq!(options.dictionaries.len(), 1);
        assert_eq!(options.dictionaries[0].description, "Normalize for preservation");
        assert_eq!(
            options.dictionaries[0].replacements["%normalize%"],
            "preservation"
        );
        assert!(g.offered_dictionary(n, "keep").is_some());
        assert!(g.offered_dictionary(n, "other").is_none());
    }
}
