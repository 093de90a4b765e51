//! Replay of the pending-operation queue.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::registry::ServiceRegistry;
use parking_lot::RwLock;
use replica_core::{Entity, EntityKey, OperationKind, PendingOperation, TransactionLog};
use replica_service::{DataService, ServiceError};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No run in progress.
    Idle,
    /// Loading the queue.
    Draining,
    /// Replaying queued operations.
    Replaying,
}

impl SyncState {
    /// Returns true while a run is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }
}

/// Statistics about sync runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that finished without a local storage failure.
    pub runs_completed: u64,
    /// Operations accepted by the remote and dequeued.
    pub operations_committed: u64,
    /// Operations that failed and stayed queued.
    pub operations_retained: u64,
    /// Operations dropped after a conflict or after too many attempts.
    pub operations_abandoned: u64,
    /// Temporary identifiers replaced by permanent ones.
    pub ids_remapped: u64,
    /// When the last run finished.
    pub last_run: Option<Instant>,
    /// Last formatted failure message.
    pub last_error: Option<String>,
}

#[derive(Default)]
struct RunReport {
    messages: Vec<String>,
    committed: u64,
    retained: u64,
    abandoned: u64,
    remapped: u64,
    /// Temporary ids whose create was kept for retry this run.
    blocked: BTreeSet<(String, EntityKey)>,
}

/// Formats a replay failure for display.
#[must_use]
pub fn failure_message(label: &str, op: &PendingOperation, message: &str) -> String {
    format!(
        "{label} {} failed for \"{}\" (id {}): {message}",
        op.kind.label(),
        op.snapshot.title,
        op.snapshot.id
    )
}

fn is_create(id: &EntityKey) -> bool {
    id.as_int().is_some_and(|v| v < 0)
}

/// Replays queued offline writes through the registered data services.
///
/// Operations are replayed strictly in queue order. When a create succeeds,
/// later operations still holding its temporary identifier are rewritten to
/// the permanent one, and every service's hooks may rewrite references to it.
/// A version conflict abandons the operation; any other failure keeps it
/// queued for the next run.
pub struct SyncEngine {
    config: SyncConfig,
    log: TransactionLog,
    services: ServiceRegistry,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

struct ActiveRun<'a> {
    state: &'a RwLock<SyncState>,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        *self.state.write() = SyncState::Idle;
    }
}

impl SyncEngine {
    /// Creates an engine draining `log` through `services`.
    #[must_use]
    pub fn new(log: TransactionLog, services: ServiceRegistry) -> Self {
        Self {
            config: SyncConfig::default(),
            log,
            services,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the registered services.
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Returns the queue being drained.
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn begin(&self) -> SyncResult<ActiveRun<'_>> {
        let mut state = self.state.write();
        if state.is_active() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{:?}", SyncState::Draining),
            });
        }
        *state = SyncState::Draining;
        Ok(ActiveRun { state: &self.state })
    }

    /// Replays every queued operation once.
    ///
    /// Returns one formatted message per failed operation. Afterwards the
    /// queue holds exactly the operations to retry.
    ///
    /// # Errors
    ///
    /// Fails if another run is active, or aborts on a local storage failure.
    pub async fn run(&self) -> SyncResult<Vec<String>> {
        let _active = self.begin()?;

        let mut queue = self.log.all()?;
        info!(pending = queue.len(), "starting sync run");
        self.set_state(SyncState::Replaying);

        let mut report = RunReport::default();
        for index in 0..queue.len() {
            self.replay(&mut queue, index, &mut report).await?;
        }

        info!(
            committed = report.committed,
            retained = report.retained,
            abandoned = report.abandoned,
            "sync run finished"
        );

        let mut stats = self.stats.write();
        stats.runs_completed += 1;
        stats.operations_committed += report.committed;
        stats.operations_retained += report.retained;
        stats.operations_abandoned += report.abandoned;
        stats.ids_remapped += report.remapped;
        stats.last_run = Some(Instant::now());
        if let Some(last) = report.messages.last() {
            stats.last_error = Some(last.clone());
        }

        Ok(report.messages)
    }

    async fn replay(
        &self,
        queue: &mut [PendingOperation],
        index: usize,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        let op = queue[index].clone();

        // A later entry for a temporary id can only replay once the entry
        // that creates it remotely has succeeded.
        if report
            .blocked
            .contains(&(op.entity_type.clone(), op.snapshot.id.clone()))
        {
            debug!(
                sequence = op.sequence,
                entity_type = %op.entity_type,
                key = %op.snapshot.id,
                "deferring operation behind its pending create"
            );
            report.retained += 1;
            return Ok(());
        }

        let service = match self.services.get(&op.entity_type) {
            Ok(service) => service,
            Err(e) => {
                self.retain(&op, &op.entity_type, &e.to_string(), report)?;
                return Ok(());
            }
        };

        if let Err(e) = service.init().await {
            self.retain(&op, service.label(), &e.to_string(), report)?;
            return Ok(());
        }

        debug!(
            sequence = op.sequence,
            entity_type = %op.entity_type,
            kind = op.kind.label(),
            key = %op.snapshot.id,
            "replaying operation"
        );

        match op.kind {
            OperationKind::AddOrUpdate => {
                let outcome = service.replay_add_or_update(op.snapshot.clone()).await?;
                match outcome.error {
                    None => {
                        let old_id = &op.snapshot.id;
                        let rest = &mut queue[index + 1..];
                        let changed = if is_create(old_id) && *old_id != outcome.entity.id {
                            report.remapped += 1;
                            self.remap(service, old_id, &outcome.entity, rest)
                        } else {
                            Vec::new()
                        };
                        self.commit(&op, rest, &changed)?;
                        report.committed += 1;
                    }
                    Some(error) if error.is_conflict() => {
                        self.abandon(&op, service.label(), &error, report)?;
                    }
                    Some(error) => {
                        self.retain(&op, service.label(), &error.to_string(), report)?;
                    }
                }
            }
            OperationKind::Delete => {
                let outcome = service.replay_delete(op.snapshot.clone()).await?;
                match outcome.error {
                    None => {
                        self.commit(&op, &[], &[])?;
                        report.committed += 1;
                    }
                    Some(error) => {
                        self.retain(&op, service.label(), &error.to_string(), report)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Points the not-yet-replayed operations at `saved`'s identifier.
    ///
    /// Returns the indexes into `rest` of the entries that changed.
    fn remap(
        &self,
        service: &DataService,
        old_id: &EntityKey,
        saved: &Entity,
        rest: &mut [PendingOperation],
    ) -> Vec<usize> {
        let entity_type = service.entity_type();
        let mut changed = Vec::new();

        for (i, op) in rest.iter_mut().enumerate() {
            if op.entity_type == entity_type && op.snapshot.id == *old_id {
                op.snapshot.id = saved.id.clone();
                op.snapshot.version = saved.version;
                changed.push(i);
            }
        }

        let mut linked = rest.to_vec();
        for other in self.services.services() {
            linked = other
                .hooks()
                .update_linked_operations(entity_type, old_id, &saved.id, linked);
        }
        for (i, (op, rewritten)) in rest.iter_mut().zip(linked).enumerate() {
            if *op != rewritten {
                *op = rewritten;
                if !changed.contains(&i) {
                    changed.push(i);
                }
            }
        }

        info!(
            entity_type,
            old = %old_id,
            new = %saved.id,
            rewritten = changed.len(),
            "remapped temporary identifier"
        );
        changed
    }

    /// Dequeues `op` and persists the rewritten entries in one transaction.
    fn commit(
        &self,
        op: &PendingOperation,
        rest: &[PendingOperation],
        changed: &[usize],
    ) -> SyncResult<()> {
        self.log.database().transaction(|txn| {
            self.log.dequeue_in_txn(txn, op.sequence)?;
            for &i in changed {
                self.log.update_in_txn(txn, &rest[i])?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn abandon(
        &self,
        op: &PendingOperation,
        label: &str,
        error: &ServiceError,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        let message = failure_message(label, op, &error.to_string());
        warn!(sequence = op.sequence, %message, "abandoning operation");
        self.log.dequeue(op)?;
        report.abandoned += 1;
        report.messages.push(message);
        Ok(())
    }

    fn retain(
        &self,
        op: &PendingOperation,
        label: &str,
        reason: &str,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        let mut op = op.clone();
        op.attempts = op.attempts.saturating_add(1);

        if self.config.exhausted(op.attempts) {
            let message = format!(
                "{} (abandoned after {} attempts)",
                failure_message(label, &op, reason),
                op.attempts
            );
            warn!(sequence = op.sequence, %message, "giving up on operation");
            self.log.dequeue(&op)?;
            report.abandoned += 1;
            report.messages.push(message);
            return Ok(());
        }

        if is_create(&op.snapshot.id) {
            report
                .blocked
                .insert((op.entity_type.clone(), op.snapshot.id.clone()));
        }

        let message = failure_message(label, &op, reason);
        warn!(
            sequence = op.sequence,
            attempts = op.attempts,
            %message,
            "operation kept for retry"
        );
        self.log.update(&op)?;
        report.retained += 1;
        report.messages.push(message);
        Ok(())
    }
}
