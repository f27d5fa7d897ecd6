// SPDX-License-Identifier: MIT

//! Graph compiler - turns configuration batches into a `ChainGraph`
//!
//! All referential checks happen here, so a batch that compiles can never
//! leave a running unit pointing at something that does not exist.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::table::ChainGraph;
use super::types::{
    Chain, ChoiceEntry, ContentType, Link, ReplacementDictionary, Target, Task, TaskAction,
    TaskIndex, Transition, WatchedLocation,
};
use crate::chainflow::config::settings::EngineSettings;
use crate::chainflow::config::types::{ConfigBatch, TaskKind, TransitionDef};
use crate::runtime::error::ConfigError;

/// Compile the given batches, in installation order, into one graph
pub fn compile(
    batches: &[ConfigBatch],
    settings: &EngineSettings,
    version: u64,
) -> Result<ChainGraph, ConfigError> {
    let mut graph = ChainGraph::empty(settings.failure_link.clone());
    graph.version = version;

    let mut task_ids: HashSet<&str> = HashSet::new();
    let mut task_index: HashMap<String, TaskIndex> = HashMap::new();
    let mut content_type_ids: HashSet<&str> = HashSet::new();

    // Pass 1: register every identifier so batches may reference each other
    for batch in batches {
        for ct in &batch.content_types {
            if !content_type_ids.insert(ct.id.as_str()) {
                return Err(ConfigError::duplicate("content type", &ct.id));
            }
            graph.content_types.push(ContentType {
                id: ct.id.clone(),
                description: ct.description.clone(),
            });
        }

        for task in &batch.tasks {
            if !task_ids.insert(task.id.as_str()) {
                return Err(ConfigError::duplicate("task", &task.id));
            }
        }

        for link in &batch.links {
            if link.id == settings.failure_link {
                return Err(ConfigError::SentinelRedefined(link.id.clone()));
            }
            if graph.link_index.contains_key(&link.id) {
                return Err(ConfigError::duplicate("link", &link.id));
            }
            graph.link_index.insert(link.id.clone(), graph.links.len());
            graph.links.push(Link {
                id: link.id.clone(),
                group: link.group.clone(),
                task: None,
                default_exit_message: link.default_exit_message,
                default_next: None,
                transitions: BTreeMap::new(),
                choices: Vec::new(),
                dictionaries: Vec::new(),
            });
        }
    }

    // Pass 2: tasks, now that link ids are known
    let all_tasks = batches.iter().flat_map(|b| b.tasks.iter());
    for def in all_tasks {
        let action = match &def.kind {
            TaskKind::Command { execute, arguments } => TaskAction::Command {
                execute: execute.clone(),
                arguments: arguments.clone(),
            },
            TaskKind::SetVariable {
                variable,
                value,
                link,
            } => TaskAction::SetVariable {
                variable: variable.clone(),
                value: value.clone(),
                link: link
                    .as_deref()
                    .map(|l| target(&graph, "task", &def.id, l))
                    .transpose()?,
            },
            TaskKind::PullVariable {
                variable,
                default_link,
            } => TaskAction::PullVariable {
                variable: variable.clone(),
                default_link: default_link
                    .as_deref()
                    .map(|l| target(&graph, "task", &def.id, l))
                    .transpose()?,
            },
            TaskKind::ReplacementDictionaryChoice {
                available_at,
                replacements,
            } => {
                let link = graph.link_by_id(available_at).ok_or_else(|| {
                    ConfigError::dangling("replacement dictionary", &def.id, "link", available_at)
                })?;
                let index = graph.dictionaries.len();
                graph.dictionaries.push(ReplacementDictionary {
                    id: def.id.clone(),
                    description: def.description.clone().unwrap_or_default(),
                    link,
                    sequence: index,
                    replacements: replacements.clone(),
                });
                graph.links[link].dictionaries.push(index);
                continue;
            }
        };
        task_index.insert(def.id.clone(), graph.tasks.len());
        graph.tasks.push(Task {
            id: def.id.clone(),
            description: def.description.clone(),
            action,
        });
    }

    // Pass 3: link tasks and default transitions
    let all_links = batches.iter().flat_map(|b| b.links.iter());
    for def in all_links {
        let index = graph.link_index[&def.id];

        if let Some(task_id) = &def.task {
            let task = match task_index.get(task_id) {
                Some(&task) => task,
                None if task_ids.contains(task_id.as_str()) => {
                    return Err(ConfigError::InvalidTaskReference {
                        link: def.id.clone(),
                        task: task_id.clone(),
                        reason: "replacement dictionaries are offered at links, not run by them"
                            .to_string(),
                    })
                }
                None => return Err(ConfigError::dangling("link", &def.id, "task", task_id)),
            };
            graph.links[index].task = Some(task);
        }

        if let Some(next) = &def.default_next {
            let next = target(&graph, "link", &def.id, next)?;
            graph.links[index].default_next = Some(next);
        }
    }

    // Pass 4: exit-status transitions
    for def in batches.iter().flat_map(|b| b.transitions.iter()) {
        let name = transition_name(def);
        let from = graph
            .link_by_id(&def.link)
            .ok_or_else(|| ConfigError::dangling("transition", &name, "link", &def.link))?;
        let to = target(&graph, "transition", &name, &def.next)?;

        match graph.links[from].transitions.entry(def.status) {
            Entry::Occupied(_) => {
                return Err(ConfigError::DuplicateTransition {
                    link: def.link.clone(),
                    status: def.status.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Transition {
                    target: to,
                    exit_message: def.exit_message,
                });
            }
        }
    }

    // Pass 5: chains
    for def in batches.iter().flat_map(|b| b.chains.iter()) {
        if graph.chain_index.contains_key(&def.id) {
            return Err(ConfigError::duplicate("chain", &def.id));
        }
        let starting_link =
            graph
                .link_by_id(&def.starting_link)
                .ok_or_else(|| ConfigError::MissingStartingLink {
                    chain: def.id.clone(),
                    link: def.starting_link.clone(),
                })?;
        graph.chain_index.insert(def.id.clone(), graph.chains.len());
        graph.chains.push(Chain {
            id: def.id.clone(),
            description: def.description.clone(),
            starting_link,
        });
    }

    // Pass 6: choices, kept in registration order
    let mut choice_ids: HashSet<&str> = HashSet::new();
    let all_choices = batches.iter().flat_map(|b| b.choices.iter());
    for (sequence, def) in all_choices.enumerate() {
        if !choice_ids.insert(def.id.as_str()) {
            return Err(ConfigError::duplicate("choice", &def.id));
        }
        let link = graph
            .link_by_id(&def.link)
            .ok_or_else(|| ConfigError::dangling("choice", &def.id, "link", &def.link))?;
        let chain = graph
            .chain_by_id(&def.chain)
            .ok_or_else(|| ConfigError::dangling("choice", &def.id, "chain", &def.chain))?;
        graph.links[link].choices.push(ChoiceEntry {
            id: def.id.clone(),
            sequence,
            chain,
        });
    }
    for link in &mut graph.links {
        link.choices
            .sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));
    }

    // Pass 7: watched locations
    for def in batches.iter().flat_map(|b| b.watched_locations.iter()) {
        let name = def.id.clone().unwrap_or_else(|| def.path.clone());
        if !content_type_ids.contains(def.expected_type.as_str()) {
            return Err(ConfigError::dangling(
                "watched location",
                &name,
                "content type",
                &def.expected_type,
            ));
        }
        let chain = graph
            .chain_by_id(&def.chain)
            .ok_or_else(|| ConfigError::dangling("watched location", &name, "chain", &def.chain))?;

        let path = settings.expand_path(&def.path);
        let key = (path.clone(), def.expected_type.clone());
        if graph.triggers.insert(key, graph.watched.len()).is_some() {
            return Err(ConfigError::duplicate(
                "watched location",
                format!("{} ({})", path, def.expected_type),
            ));
        }
        graph.watched.push(WatchedLocation {
            id: def.id.clone(),
            path,
            expected_type: def.expected_type.clone(),
            chain,
            unit_type: def.unit_type.clone(),
        });
    }

    log::debug!(
        "Compiled graph v{}: {} links, {} chains, {} triggers",
        version,
        graph.links.len(),
        graph.chains.len(),
        graph.triggers.len()
    );

    Ok(graph)
}

fn target(
    graph: &ChainGraph,
    kind: &'static str,
    from: &str,
    id: &str,
) -> Result<Target, ConfigError> {
    graph
        .target_by_id(id)
        .ok_or_else(|| ConfigError::dangling(kind, from, "link", id))
}

fn transition_name(def: &TransitionDef) -> String {
    def.id
        .clone()
        .unwrap_or_else(|| format!("{}:{}", def.link, def.status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainflow::config::ConfigLoader;
    use crate::chainflow::graph::status::ExitStatus;

    fn batch(yaml: &str) -> ConfigBatch {
        ConfigLoader::parse_batch(yaml).unwrap()
    }

    fn compile_one(yaml: &str) -> Result<ChainGraph, ConfigError> {
        compile(&[batch(yaml)], &EngineSettings::default(), 1)
    }

    #[test]
    fn test_compiles_minimal_graph() {
        let graph = compile_one(
            r#"
name: base
links:
  - id: a
    default_next: b
  - id: b
    default_exit_message: completed_successfully
chains:
  - id: main
    starting_link: a
"#,
        )
        .unwrap();

        assert_eq!(graph.version(), 1);
        let a = graph.link_by_id("a").unwrap();
        let b = graph.link_by_id("b").unwrap();
        assert_eq!(graph.link(a).default_next, Some(Target::Link(b)));
        assert!(graph.is_terminal(b));
        assert_eq!(graph.chain(graph.chain_by_id("main").unwrap()).starting_link, a);
    }

    #[test]
    fn test_missing_starting_link_rejected() {
        let err = compile_one(
            r#"
name: bad
links:
  - id: a
chains:
  - id: main
    starting_link: nowhere
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingStartingLink {
                chain: "main".to_string(),
                link: "nowhere".to_string()
            }
        );
    }

    #[test]
    fn test_dangling_default_next_rejected() {
        let err = compile_one("name: bad\nlinks:\n  - id: a\n    default_next: ghost\n").unwrap_err();
        assert!(matches!(err, ConfigError::DanglingReference { .. }));
    }

    #[test]
    fn test_failure_sentinel_is_a_valid_target() {
        let graph = compile_one(
            "name: ok\nlinks:\n  - id: a\n    default_next: default-failure\n",
        )
        .unwrap();
        let a = graph.link_by_id("a").unwrap();
        assert_eq!(graph.link(a).default_next, Some(Target::Failed));
        assert!(graph.link_by_id("default-failure").is_none());
    }

    #[test]
    fn test_configurable_failure_sentinel() {
        let settings = EngineSettings {
            failure_link: "61c316a6-0a50-4f65-8767-1f44b1eeb6dd".to_string(),
            ..Default::default()
        };
        let graph = compile(
            &[batch(
                "name: ok\nlinks:\n  - id: a\n    default_next: 61c316a6-0a50-4f65-8767-1f44b1eeb6dd\n",
            )],
            &settings,
            1,
        )
        .unwrap();
        let a = graph.link_by_id("a").unwrap();
        assert_eq!(graph.link(a).default_next, Some(Target::Failed));

        // The old default is now just an unknown id
        let err = compile(
            &[batch("name: bad\nlinks:\n  - id: a\n    default_next: default-failure\n")],
            &settings,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DanglingReference { .. }));
    }

    #[test]
    fn test_sentinel_cannot_be_a_link() {
        let err = compile_one("name: bad\nlinks:\n  - id: default-failure\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::SentinelRedefined("default-failure".to_string())
        );
    }

    #[test]
    fn test_duplicate_transition_rejected() {
        let err = compile_one(
            r#"
name: bad
links:
  - id: a
  - id: b
  - id: c
transitions:
  - link: a
    status: success
    next: b
  - link: a
    status: success
    next: c
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateTransition {
                link: "a".to_string(),
                status: "success".to_string()
            }
        );
    }

    #[test]
    fn test_code_and_symbol_are_distinct_keys() {
        let graph = compile_one(
            r#"
name: ok
links:
  - id: a
  - id: b
  - id: c
transitions:
  - link: a
    status: 0
    next: b
  - link: a
    status: success
    next: c
"#,
        )
        .unwrap();
        let a = graph.link_by_id("a").unwrap();
        assert_eq!(graph.link(a).transitions.len(), 2);
        assert!(graph.link(a).transitions.contains_key(&ExitStatus::Code(0)));
    }

    #[test]
    fn test_duplicate_link_across_batches_rejected() {
        let err = compile(
            &[batch("name: one\nlinks:\n  - id: a\n"), batch("name: two\nlinks:\n  - id: a\n")],
            &EngineSettings::default(),
            1,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::duplicate("link", "a"));
    }

    #[test]
    fn test_later_batch_references_earlier_one() {
        let graph = compile(
            &[
                batch("name: one\nlinks:\n  - id: a\nchains:\n  - id: main\n    starting_link: a\n"),
                batch(
                    "name: two\nlinks:\n  - id: b\n    default_next: a\nchoices:\n  - id: c1\n    link: b\n    chain: main\n",
                ),
            ],
            &EngineSettings::default(),
            2,
        )
        .unwrap();
        let b = graph.link_by_id("b").unwrap();
        assert_eq!(graph.choices_for(b)[0].id, "main");
    }

    #[test]
    fn test_link_cannot_run_dictionary() {
        let err = compile_one(
            r#"
name: bad
tasks:
  - id: dict
    description: "Do not normalize"
    kind: replacement_dictionary_choice
    available_at: a
links:
  - id: a
    task: dict
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTaskReference { .. }));
    }

    #[test]
    fn test_watched_location_requires_content_type() {
        let err = compile_one(
            r#"
name: bad
links:
  - id: a
chains:
  - id: main
    starting_link: a
watched_locations:
  - path: /incoming
    expected_type: unknown
    chain: main
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DanglingReference {
                target_kind: "content type",
                ..
            }
        ));
    }

    #[test]
    fn test_pull_variable_default_must_exist() {
        let err = compile_one(
            r#"
name: bad
tasks:
  - id: pull
    kind: pull_variable
    variable: x
    default_link: ghost
"#,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::dangling("task", "pull", "link", "ghost"));
    }
}
