// SPDX-License-Identifier: MIT

//! The compiled chain graph and transition resolution

use std::collections::HashMap;

use super::status::{ExitStatus, JobStatus};
use super::types::{
    Chain, ChainIndex, ContentType, Link, LinkIndex, ReplacementDictionary, Resolution,
    ResolvedBy, Target, Task, WatchedLocation,
};

/// An immutable snapshot of the whole workflow graph
///
/// Built by the compiler from the installed batches. Running units hold an
/// `Arc` to the snapshot they started with, so installing new configuration
/// never changes the graph underneath them.
#[derive(Debug)]
pub struct ChainGraph {
    pub(crate) version: u64,
    pub(crate) failure_link: String,
    pub(crate) links: Vec<Link>,
    pub(crate) link_index: HashMap<String, LinkIndex>,
    pub(crate) tasks: Vec<Task>,
    pub(crate) chains: Vec<Chain>,
    pub(crate) chain_index: HashMap<String, ChainIndex>,
    pub(crate) dictionaries: Vec<ReplacementDictionary>,
    pub(crate) content_types: Vec<ContentType>,
    pub(crate) watched: Vec<WatchedLocation>,
    /// (expanded path, content type) to an index into `watched`
    pub(crate) triggers: HashMap<(String, String), usize>,
}

impl ChainGraph {
    /// An empty graph, used before any batch is installed
    pub fn empty(failure_link: impl Into<String>) -> Self {
        Self {
            version: 0,
            failure_link: failure_link.into(),
            links: Vec::new(),
            link_index: HashMap::new(),
            tasks: Vec::new(),
            chains: Vec::new(),
            chain_index: HashMap::new(),
            dictionaries: Vec::new(),
            content_types: Vec::new(),
            watched: Vec::new(),
            triggers: HashMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn failure_link(&self) -> &str {
        &self.failure_link
    }

    pub fn link(&self, index: LinkIndex) -> &Link {
        &self.links[index]
    }

    pub fn link_by_id(&self, id: &str) -> Option<LinkIndex> {
        self.link_index.get(id).copied()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn task_of(&self, link: LinkIndex) -> Option<&Task> {
        self.links[link].task.map(|t| &self.tasks[t])
    }

    pub fn chain(&self, index: ChainIndex) -> &Chain {
        &self.chains[index]
    }

    pub fn chain_by_id(&self, id: &str) -> Option<ChainIndex> {
        self.chain_index.get(id).copied()
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn dictionary(&self, index: usize) -> &ReplacementDictionary {
        &self.dictionaries[index]
    }

    pub fn content_types(&self) -> &[ContentType] {
        &self.content_types
    }

    /// Map an identifier to a target, honouring the failure sentinel
    pub fn target_by_id(&self, id: &str) -> Option<Target> {
        if id == self.failure_link {
            Some(Target::Failed)
        } else {
            self.link_by_id(id).map(Target::Link)
        }
    }

    /// Identifier of a target; the failure state reports the sentinel id
    pub fn target_id(&self, target: Target) -> &str {
        match target {
            Target::Link(index) => &self.links[index].id,
            Target::Failed => &self.failure_link,
        }
    }

    /// Resolve the link that follows `link` after its task ended with `status`
    ///
    /// Precedence: an exit-status transition on the link, then the link's
    /// default next, then the failure state. Numeric codes try the exact code
    /// before their symbolic class.
    pub fn resolve_next(&self, link: LinkIndex, status: ExitStatus) -> Resolution {
        let node = &self.links[link];

        for key in status.lookup_keys() {
            if let Some(transition) = node.transitions.get(&key) {
                return Resolution {
                    target: transition.target,
                    exit_message: transition.exit_message,
                    resolved_by: ResolvedBy::Transition,
                };
            }
        }

        match node.default_next {
            Some(target) => Resolution {
                target,
                exit_message: node.default_exit_message,
                resolved_by: ResolvedBy::DefaultNext,
            },
            None => Resolution {
                target: Target::Failed,
                exit_message: JobStatus::Failed,
                resolved_by: ResolvedBy::Unresolved,
            },
        }
    }

    /// `resolve_next` keyed by identifiers, for callers outside the engine
    pub fn resolve_next_id(&self, link_id: &str, status: ExitStatus) -> Option<&str> {
        let link = self.link_by_id(link_id)?;
        Some(self.target_id(self.resolve_next(link, status).target))
    }

    /// A link with no task and no options ends the chain
    pub fn is_terminal(&self, link: LinkIndex) -> bool {
        let node = &self.links[link];
        node.task.is_none() && !node.has_options()
    }
}
