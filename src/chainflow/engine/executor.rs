// SPDX-License-Identifier: MIT

//! Engine that walks processing units through the chain graph

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock, Semaphore};

use super::events::UnitEvent;
use super::unit::{
    is_plain_unit_id, FailureReason, PendingDecision, StepRecord, Unit, UnitContext, UnitHandle,
    UnitSnapshot, UnitState,
};
use crate::chainflow::graph::{ExitStatus, JobStatus, LinkIndex, ResolvedBy, Target, TaskAction};
use crate::chainflow::registry::GraphRegistry;
use crate::chainflow::state::{RecordStore, UnitVariable};
use crate::runtime::error::{ChainError, ChainResult};
use crate::runtime::runner::{CommandInvocation, TaskRunner};
use crate::runtime::template;

const EVENT_CAPACITY: usize = 256;
const MAX_REDIRECTS: usize = 1000; // Safety limit for steps that run no task

/// A command task ready to hand to the runner
struct PendingCommand {
    link: LinkIndex,
    invocation: CommandInvocation,
}

/// Drives units through the graph
///
/// Cloning is cheap; clones share units, slots and the event channel.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: GraphRegistry,
    runner: Arc<dyn TaskRunner>,
    slots: Semaphore,
    units: RwLock<HashMap<String, Arc<UnitHandle>>>,
    events: broadcast::Sender<UnitEvent>,
    records: Option<RecordStore>,
}

impl Engine {
    pub fn new(registry: GraphRegistry, runner: Arc<dyn TaskRunner>) -> Self {
        let settings = registry.settings();
        let slots = Semaphore::new(settings.max_concurrent_tasks.max(1));
        let records = settings.state_dir.clone().map(RecordStore::new);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(EngineInner {
                registry,
                runner,
                slots,
                units: RwLock::new(HashMap::new()),
                events,
                records,
            }),
        }
    }

    pub fn registry(&self) -> &GraphRegistry {
        &self.inner.registry
    }

    /// Receive every `UnitEvent` published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UnitEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, event: UnitEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    // ------------------------------------------------------------------
    // Starting units
    // ------------------------------------------------------------------

    async fn create_unit(&self, chain_id: &str, context: UnitContext) -> ChainResult<Arc<UnitHandle>> {
        if let Some(id) = context.unit_id.as_deref().filter(|id| !is_plain_unit_id(id)) {
            return Err(ChainError::InvalidUnitId(id.to_string()));
        }
        let graph = self.inner.registry.snapshot().await;
        let chain = graph
            .chain_by_id(chain_id)
            .ok_or_else(|| ChainError::UnknownChain(chain_id.to_string()))?;
        let starting = graph.chain(chain).starting_link;
        let unit = Unit::new(graph.clone(), chain_id.to_string(), starting, context);
        let id = unit.id.clone();

        let handle = {
            let mut units = self.inner.units.write().await;
            if units.contains_key(&id) {
                return Err(ChainError::DuplicateUnit(id));
            }
            let handle = Arc::new(UnitHandle::new(unit));
            units.insert(id.clone(), handle.clone());
            handle
        };

        log::info!(
            "Unit {} queued on chain {} (graph v{})",
            id,
            chain_id,
            graph.version()
        );
        self.publish(UnitEvent::Started {
            unit: id,
            chain: chain_id.to_string(),
        });
        Ok(handle)
    }

    /// Start a unit on `chain_id` in the background; returns its id
    pub async fn start_unit(&self, chain_id: &str, context: UnitContext) -> ChainResult<String> {
        let handle = self.create_unit(chain_id, context).await?;
        let id = handle.unit.lock().await.id.clone();
        self.spawn_drive(handle);
        Ok(id)
    }

    /// Run a unit on `chain_id` until it completes, fails or awaits a decision
    pub async fn run_unit(&self, chain_id: &str, context: UnitContext) -> ChainResult<UnitSnapshot> {
        let handle = self.create_unit(chain_id, context).await?;
        self.drive(handle.clone()).await;
        let snapshot = handle.unit.lock().await.snapshot();
        Ok(snapshot)
    }

    /// Chain registered for `(path, content_type)` on the current graph
    pub async fn match_trigger(&self, path: &str, content_type: &str) -> Option<String> {
        let graph = self.inner.registry.snapshot().await;
        graph
            .match_trigger(path, content_type)
            .map(|chain| chain.id.clone())
    }

    /// Start a unit for content observed at a watched location
    ///
    /// Returns `None` when the pair is not registered.
    pub async fn trigger(
        &self,
        path: &str,
        content_type: &str,
        mut context: UnitContext,
    ) -> ChainResult<Option<String>> {
        let graph = self.inner.registry.snapshot().await;
        let Some(location) = graph.watched_location(path, content_type) else {
            log::info!("No watched location for {} ({})", path, content_type);
            return Ok(None);
        };

        let chain_id = graph.chain(location.chain).id.clone();
        if context.unit_type.is_none() {
            context.unit_type = location.unit_type.clone();
        }
        log::info!("Trigger {} ({}) starts chain {}", path, content_type, chain_id);
        self.start_unit(&chain_id, context).await.map(Some)
    }

    fn spawn_drive(&self, handle: Arc<UnitHandle>) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(handle).await;
        });
    }

    // ------------------------------------------------------------------
    // Graph walk
    // ------------------------------------------------------------------

    /// Advance a unit until it comes to rest
    async fn drive(&self, handle: Arc<UnitHandle>) {
        {
            let mut unit = handle.unit.lock().await;
            if unit.state == UnitState::Queued {
                handle.set_state(&mut unit, UnitState::Running);
                let start = unit.current;
                if let Some(link) = start {
                    self.enter(&mut unit, link);
                }
            }
        }

        loop {
            let command = {
                let mut unit = handle.unit.lock().await;
                if unit.state != UnitState::Running {
                    return;
                }
                if handle.cancel_requested() {
                    self.fail(&handle, &mut unit, FailureReason::Aborted);
                    return;
                }
                match self.advance(&handle, &mut unit).await {
                    Some(command) => command,
                    None => return,
                }
            };

            let status = self.execute(&command.invocation).await;

            let mut unit = handle.unit.lock().await;
            if !self.transition(&handle, &mut unit, command.link, status) {
                return;
            }
        }
    }

    /// Take every step that needs no external process
    ///
    /// Returns the next command to run, or `None` once the unit is at rest.
    async fn advance(&self, handle: &UnitHandle, unit: &mut Unit) -> Option<PendingCommand> {
        let graph = unit.graph.clone();

        for _ in 0..MAX_REDIRECTS {
            let link = unit.current?;
            let node = graph.link(link);

            if node.has_options() && !unit.decided {
                self.suspend(handle, unit, link).await;
                return None;
            }
            unit.decided = false;

            match graph.task_of(link).map(|task| &task.action) {
                Some(TaskAction::Command { execute, arguments }) => {
                    let invocation = CommandInvocation {
                        unit_id: unit.id.clone(),
                        link_id: node.id.clone(),
                        execute: execute.clone(),
                        arguments: template::render_arguments(
                            arguments,
                            &unit.argument_replacements(),
                        ),
                    };
                    return Some(PendingCommand { link, invocation });
                }
                Some(TaskAction::SetVariable {
                    variable,
                    value,
                    link: bound,
                }) => {
                    let binding = UnitVariable {
                        value: value.clone(),
                        link: bound.map(|t| graph.target_id(t).to_string()),
                    };
                    log::debug!("Unit {} sets {} = {:?}", unit.id, variable, binding);
                    unit.variables.set(variable.clone(), binding);
                    if !self.transition(handle, unit, link, ExitStatus::Success) {
                        return None;
                    }
                }
                Some(TaskAction::PullVariable {
                    variable,
                    default_link,
                }) => {
                    // A binding to a link missing from this graph counts as unset
                    let bound = unit
                        .variables
                        .link(variable)
                        .and_then(|id| graph.target_by_id(id));
                    match bound.or(*default_link) {
                        Some(target) => {
                            if !self.redirect(handle, unit, link, target) {
                                return None;
                            }
                        }
                        None => {
                            log::warn!(
                                "Unit {}: variable {} is unset at {} and no default is configured",
                                unit.id,
                                variable,
                                node.id
                            );
                            let reason = FailureReason::UnresolvedTransition {
                                link: node.id.clone(),
                                status: format!("unset variable {}", variable),
                            };
                            self.fail(handle, unit, reason);
                            return None;
                        }
                    }
                }
                // A dictionary was picked at a link that runs nothing
                None if node.has_options() => {
                    if !self.transition(handle, unit, link, ExitStatus::Success) {
                        return None;
                    }
                }
                None => {
                    self.finish_at_terminal(handle, unit, link);
                    return None;
                }
            }
        }

        let link = unit.current_link_id().unwrap_or_default().to_string();
        log::error!("Unit {} exceeded {} redirects", unit.id, MAX_REDIRECTS);
        self.fail(handle, unit, FailureReason::RedirectLoop { link });
        None
    }

    async fn execute(&self, invocation: &CommandInvocation) -> ExitStatus {
        let _permit = match self.inner.slots.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                log::error!("Task slots unavailable: {}", e);
                return ExitStatus::InfrastructureFailure;
            }
        };

        match self.inner.runner.run(invocation).await {
            Ok(code) => ExitStatus::Code(code),
            Err(e) => {
                log::error!(
                    "Unit {} link {}: {}",
                    invocation.unit_id,
                    invocation.link_id,
                    e
                );
                ExitStatus::InfrastructureFailure
            }
        }
    }

    fn enter(&self, unit: &mut Unit, link: LinkIndex) {
        let node = unit.graph.link(link);
        log::info!("Unit {} entering {} ({})", unit.id, node.id, node.group);
        let event = UnitEvent::LinkEntered {
            unit: unit.id.clone(),
            link: node.id.clone(),
            group: node.group.clone(),
        };
        unit.current = Some(link);
        self.publish(event);
    }

    /// Resolve and follow the next link after `status`; false once at rest
    fn transition(
        &self,
        handle: &UnitHandle,
        unit: &mut Unit,
        link: LinkIndex,
        status: ExitStatus,
    ) -> bool {
        let graph = unit.graph.clone();
        let node = graph.link(link);
        let resolution = graph.resolve_next(link, status);

        unit.history.push(StepRecord {
            link: node.id.clone(),
            group: node.group.clone(),
            status: Some(status),
            job_status: Some(resolution.exit_message),
            decision: None,
            next: Some(graph.target_id(resolution.target).to_string()),
            at: Utc::now(),
        });

        match resolution.target {
            Target::Link(next) => {
                self.enter(unit, next);
                true
            }
            Target::Failed if resolution.resolved_by == ResolvedBy::Unresolved => {
                log::warn!(
                    "Unit {}: no transition from {} for status {}",
                    unit.id,
                    node.id,
                    status
                );
                let reason = FailureReason::UnresolvedTransition {
                    link: node.id.clone(),
                    status: status.to_string(),
                };
                self.fail(handle, unit, reason);
                false
            }
            Target::Failed => {
                let reason = FailureReason::FailureLink {
                    link: node.id.clone(),
                };
                self.fail(handle, unit, reason);
                false
            }
        }
    }

    /// Follow a pull-variable redirect; false once at rest
    fn redirect(&self, handle: &UnitHandle, unit: &mut Unit, link: LinkIndex, target: Target) -> bool {
        let graph = unit.graph.clone();
        let node = graph.link(link);
        unit.history.push(StepRecord {
            link: node.id.clone(),
            group: node.group.clone(),
            status: None,
            job_status: None,
            decision: None,
            next: Some(graph.target_id(target).to_string()),
            at: Utc::now(),
        });

        match target {
            Target::Link(next) => {
                self.enter(unit, next);
                true
            }
            Target::Failed => {
                let reason = FailureReason::FailureLink {
                    link: node.id.clone(),
                };
                self.fail(handle, unit, reason);
                false
            }
        }
    }

    fn finish_at_terminal(&self, handle: &UnitHandle, unit: &mut Unit, link: LinkIndex) {
        let graph = unit.graph.clone();
        let node = graph.link(link);
        unit.history.push(StepRecord {
            link: node.id.clone(),
            group: node.group.clone(),
            status: None,
            job_status: Some(node.default_exit_message),
            decision: None,
            next: None,
            at: Utc::now(),
        });

        match node.default_exit_message {
            JobStatus::CompletedSuccessfully => self.complete(handle, unit),
            JobStatus::Failed => self.fail(
                handle,
                unit,
                FailureReason::TerminalLink {
                    link: node.id.clone(),
                },
            ),
        }
    }

    fn complete(&self, handle: &UnitHandle, unit: &mut Unit) {
        unit.variables.clear();
        unit.pending = None;
        handle.set_state(unit, UnitState::Completed);
        log::info!("Unit {} completed", unit.id);
        self.publish(UnitEvent::Completed {
            unit: unit.id.clone(),
        });
    }

    fn fail(&self, handle: &UnitHandle, unit: &mut Unit, reason: FailureReason) {
        log::error!("Unit {} failed: {}", unit.id, reason);
        unit.failure = Some(reason.clone());
        unit.pending = None;
        handle.set_state(unit, UnitState::Failed);
        self.publish(UnitEvent::Failed {
            unit: unit.id.clone(),
            reason,
        });
    }

    async fn suspend(&self, handle: &UnitHandle, unit: &mut Unit, link: LinkIndex) {
        let graph = unit.graph.clone();
        let node = graph.link(link);
        let options = graph.decision_options(link);
        unit.pending = Some(PendingDecision {
            link: node.id.clone(),
            group: node.group.clone(),
            options: options.clone(),
            since: Utc::now(),
        });

        if let (Some(store), Some(record)) = (&self.inner.records, unit.awaiting_record()) {
            if let Err(e) = store.save(&record).await {
                let reason = FailureReason::DecisionNotRecorded {
                    link: node.id.clone(),
                    message: e.to_string(),
                };
                self.fail(handle, unit, reason);
                return;
            }
        }

        handle.set_state(unit, UnitState::AwaitingChoice);
        log::info!(
            "Unit {} awaiting a decision at {} ({} chains, {} dictionaries)",
            unit.id,
            node.id,
            options.chains.len(),
            options.dictionaries.len()
        );
        self.publish(UnitEvent::AwaitingChoice {
            unit: unit.id.clone(),
            link: node.id.clone(),
            options,
        });
    }

    // ------------------------------------------------------------------
    // Decisions
    // ------------------------------------------------------------------

    async fn handle(&self, unit_id: &str) -> ChainResult<Arc<UnitHandle>> {
        self.inner
            .units
            .read()
            .await
            .get(unit_id)
            .cloned()
            .ok_or_else(|| ChainError::UnknownUnit(unit_id.to_string()))
    }

    fn awaiting_link(unit: &Unit, action: &str) -> ChainResult<LinkIndex> {
        match (unit.state, unit.current) {
            (UnitState::AwaitingChoice, Some(link)) => Ok(link),
            _ => Err(ChainError::invalid_state(&unit.id, unit.state, action)),
        }
    }

    async fn forget_record(&self, unit_id: &str) {
        if let Some(store) = &self.inner.records {
            if let Err(e) = store.remove(unit_id).await {
                log::error!("Failed to remove decision record for unit {}: {}", unit_id, e);
            }
        }
    }

    async fn resume(&self, handle: &UnitHandle, unit: &mut Unit, link: LinkIndex, decision: &str) {
        let node = unit.graph.link(link);
        unit.history.push(StepRecord {
            link: node.id.clone(),
            group: node.group.clone(),
            status: None,
            job_status: None,
            decision: Some(decision.to_string()),
            next: None,
            at: Utc::now(),
        });
        let link_id = node.id.clone();

        unit.pending = None;
        self.forget_record(&unit.id).await;
        handle.set_state(unit, UnitState::Running);
        log::info!("Unit {} resumed at {} with {}", unit.id, link_id, decision);
        self.publish(UnitEvent::Resumed {
            unit: unit.id.clone(),
            link: link_id,
            decision: decision.to_string(),
        });
    }

    /// Resume an awaiting unit at the starting link of `chain_id`
    ///
    /// The chain must be one of those offered at the unit's link. The unit
    /// continues in the background; the returned snapshot shows it running.
    pub async fn select_chain(&self, unit_id: &str, chain_id: &str) -> ChainResult<UnitSnapshot> {
        let handle = self.handle(unit_id).await?;
        let snapshot = {
            let mut unit = handle.unit.lock().await;
            let link = Self::awaiting_link(&unit, "select a chain")?;
            let graph = unit.graph.clone();
            let chain = graph
                .offered_chain(link, chain_id)
                .ok_or_else(|| ChainError::NotAnOption {
                    unit: unit.id.clone(),
                    link: graph.link(link).id.clone(),
                    option: chain_id.to_string(),
                })?;

            self.resume(&handle, &mut unit, link, chain_id).await;
            unit.chain_id = chain_id.to_string();
            self.enter(&mut unit, graph.chain(chain).starting_link);
            unit.snapshot()
        };

        self.spawn_drive(handle);
        Ok(snapshot)
    }

    /// Merge a replacement dictionary and run the awaiting link's task
    pub async fn select_replacement(
        &self,
        unit_id: &str,
        dictionary_id: &str,
    ) -> ChainResult<UnitSnapshot> {
        let handle = self.handle(unit_id).await?;
        let snapshot = {
            let mut unit = handle.unit.lock().await;
            let link = Self::awaiting_link(&unit, "select a replacement dictionary")?;
            let graph = unit.graph.clone();
            let dictionary = graph
                .offered_dictionary(link, dictionary_id)
                .ok_or_else(|| ChainError::NotAnOption {
                    unit: unit.id.clone(),
                    link: graph.link(link).id.clone(),
                    option: dictionary_id.to_string(),
                })?;

            unit.replacements
                .extend(graph.dictionary(dictionary).replacements.clone());
            self.resume(&handle, &mut unit, link, dictionary_id).await;
            unit.decided = true;
            unit.snapshot()
        };

        self.spawn_drive(handle);
        Ok(snapshot)
    }

    /// Stop a unit on operator request
    ///
    /// Awaiting and queued units fail at once. A running unit finishes its
    /// current task and fails before the next step.
    pub async fn abort_unit(&self, unit_id: &str) -> ChainResult<UnitSnapshot> {
        let handle = self.handle(unit_id).await?;
        let mut unit = handle.unit.lock().await;
        match unit.state {
            UnitState::Completed | UnitState::Failed => {
                Err(ChainError::invalid_state(&unit.id, unit.state, "abort"))
            }
            UnitState::Running => {
                log::info!("Unit {} will stop before its next step", unit.id);
                handle.request_cancel();
                Ok(unit.snapshot())
            }
            UnitState::Queued | UnitState::AwaitingChoice => {
                self.fail(&handle, &mut unit, FailureReason::Aborted);
                self.forget_record(&unit.id).await;
                Ok(unit.snapshot())
            }
        }
    }

    /// Fail every unit that has awaited a decision longer than the timeout
    ///
    /// Does nothing when no timeout is configured. Returns the expired ids.
    pub async fn expire_decisions(&self, now: DateTime<Utc>) -> Vec<String> {
        let Some(timeout) = self.inner.registry.settings().decision_timeout() else {
            return Vec::new();
        };
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };

        let handles: Vec<Arc<UnitHandle>> =
            self.inner.units.read().await.values().cloned().collect();
        let mut expired = Vec::new();

        for handle in handles {
            let mut unit = handle.unit.lock().await;
            if unit.state != UnitState::AwaitingChoice {
                continue;
            }
            let Some(pending) = unit.pending.clone() else {
                continue;
            };
            if now - pending.since < timeout {
                continue;
            }

            self.fail(
                &handle,
                &mut unit,
                FailureReason::DecisionTimedOut { link: pending.link },
            );
            self.forget_record(&unit.id).await;
            expired.push(unit.id.clone());
        }

        expired.sort();
        expired
    }

    /// Restore units that were awaiting a decision when the process stopped
    ///
    /// Restored units resume on the current graph. Records whose link no
    /// longer offers a decision are left on disk and skipped.
    pub async fn recover(&self) -> ChainResult<usize> {
        let Some(store) = &self.inner.records else {
            return Ok(0);
        };
        let graph = self.inner.registry.snapshot().await;
        let mut restored = 0;

        for record in store.load_all().await? {
            if self.inner.units.read().await.contains_key(&record.unit_id) {
                continue;
            }
            let Some(link) = graph.link_by_id(&record.link_id) else {
                log::warn!(
                    "Skipping unit {}: link {} is not in graph v{}",
                    record.unit_id,
                    record.link_id,
                    graph.version()
                );
                continue;
            };
            if !graph.link(link).has_options() {
                log::warn!(
                    "Skipping unit {}: link {} no longer offers a decision",
                    record.unit_id,
                    record.link_id
                );
                continue;
            }
            if record.graph_version != graph.version() {
                log::info!(
                    "Unit {} was suspended on graph v{}, resuming on v{}",
                    record.unit_id,
                    record.graph_version,
                    graph.version()
                );
            }

            let unit = Unit::from_record(graph.clone(), link, record);
            let id = unit.id.clone();
            self.inner
                .units
                .write()
                .await
                .insert(id, Arc::new(UnitHandle::new(unit)));
            restored += 1;
        }

        log::info!("Recovered {} units awaiting a decision", restored);
        Ok(restored)
    }

    // ------------------------------------------------------------------
    // Variables and inspection
    // ------------------------------------------------------------------

    /// Bind a variable in the unit's namespace, replacing any earlier value
    pub async fn set_variable(
        &self,
        unit_id: &str,
        name: &str,
        variable: UnitVariable,
    ) -> ChainResult<()> {
        let handle = self.handle(unit_id).await?;
        let mut unit = handle.unit.lock().await;
        if unit.state.is_terminal() {
            return Err(ChainError::invalid_state(&unit.id, unit.state, "set variables"));
        }
        unit.variables.set(name, variable);
        Ok(())
    }

    /// `None` when the name is unset
    pub async fn get_variable(&self, unit_id: &str, name: &str) -> ChainResult<Option<UnitVariable>> {
        let handle = self.handle(unit_id).await?;
        let unit = handle.unit.lock().await;
        Ok(unit.variables.get(name).cloned())
    }

    pub async fn unit(&self, unit_id: &str) -> ChainResult<UnitSnapshot> {
        let handle = self.handle(unit_id).await?;
        let snapshot = handle.unit.lock().await.snapshot();
        Ok(snapshot)
    }

    /// All known units, oldest first
    pub async fn units(&self) -> Vec<UnitSnapshot> {
        let handles: Vec<Arc<UnitHandle>> =
            self.inner.units.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.unit.lock().await.snapshot());
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    pub async fn watch_unit(&self, unit_id: &str) -> ChainResult<watch::Receiver<UnitState>> {
        Ok(self.handle(unit_id).await?.subscribe())
    }

    /// Wait until the unit completes, fails or awaits a decision
    pub async fn wait_for_rest(&self, unit_id: &str) -> ChainResult<UnitSnapshot> {
        let handle = self.handle(unit_id).await?;
        let mut rx = handle.subscribe();
        rx.wait_for(|state| state.is_at_rest())
            .await
            .map_err(|e| ChainError::other(e.to_string()))?;
        let snapshot = handle.unit.lock().await.snapshot();
        Ok(snapshot)
    }
}
