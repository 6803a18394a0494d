//! Per-entity sync scheduling.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::remote::RemoteStore;
use crate::replica::EntityReplica;
use crate::state::{PassOutcome, SkipReason, SyncState, SyncStats, SyncStatus};
use crate::store::LocalStateStore;
use holdfast_protocol::{
    EmergencyRecord, EntityId, MutationKind, PendingWrite, Priority, StateSnapshot, Value, WriteId,
};
use holdfast_storage::SlotBackend;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Messages to the scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncEvent {
    /// A high-priority write was recorded while online.
    Critical,
    /// A medium or low priority write was recorded.
    Debounce,
    /// A request was coalesced while a pass was running.
    Flush,
    /// Stop scheduling.
    Stop,
}

/// Which writes a pass reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassScope {
    /// High priority only, committed in one piece.
    Critical,
    /// Medium and low priority, chunked.
    Debounced,
    /// High, then medium, then low.
    Full,
}

/// Claims the single-flight flag for the lifetime of the guard.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Cooldown {
    until: Option<Instant>,
    current: Duration,
}

struct Shared<R: RemoteStore, B: SlotBackend> {
    replica: EntityReplica<B>,
    engine: ReconciliationEngine<R>,
    config: SyncConfig,
    connectivity: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<SyncEvent>,
    syncing: AtomicBool,
    stopped: AtomicBool,
    halted: AtomicBool,
    rerun: AtomicBool,
    cooldown: Mutex<Cooldown>,
    stats: Mutex<SyncStats>,
    status: watch::Sender<SyncStatus>,
}

/// Schedules reconciliation for one entity.
///
/// The orchestrator owns the entity's [`EntityReplica`] and a scheduler task
/// that runs passes on:
/// - a periodic tick (skipped while offline or cooling down after a failure)
/// - a high-priority mutation while online (immediate critical pass)
/// - quiescence after medium/low priority mutations (debounced pass)
/// - connectivity returning (full pass if anything is pending)
///
/// At most one pass runs at a time. Requests that arrive during a pass are
/// coalesced into a follow-up pass.
///
/// Mutations and reads never wait on the network.
///
/// # Example
///
/// ```rust,no_run
/// use holdfast_engine::{LocalStateStore, MemoryRemoteStore, SyncConfig, SyncOrchestrator};
/// use holdfast_protocol::{EntityId, MutationKind, StateSnapshot, Value};
/// use holdfast_storage::InMemoryBackend;
/// use std::sync::Arc;
/// use tokio::sync::watch;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(LocalStateStore::new(InMemoryBackend::new()));
/// let remote = Arc::new(MemoryRemoteStore::new());
/// let (online, connectivity) = watch::channel(false);
///
/// let orchestrator = SyncOrchestrator::start(
///     store,
///     EntityId::new("player-1")?,
///     StateSnapshot::from_fields([("health", Value::from(100))]),
///     remote,
///     connectivity,
///     SyncConfig::default(),
/// )?;
///
/// orchestrator.mutate(MutationKind::UpdateHealth, Value::from(40));
/// assert_eq!(orchestrator.read_state().integer("health"), Some(40));
///
/// online.send(true)?;
/// orchestrator.stop_sync().await;
/// # Ok(())
/// # }
/// ```
pub struct SyncOrchestrator<R: RemoteStore + 'static, B: SlotBackend + 'static> {
    shared: Arc<Shared<R, B>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteStore + 'static, B: SlotBackend + 'static> SyncOrchestrator<R, B> {
    /// Opens the entity and spawns its scheduler task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails only if an existing local record cannot be read.
    pub fn start(
        store: Arc<LocalStateStore<B>>,
        entity_id: EntityId,
        seed: StateSnapshot,
        remote: Arc<R>,
        connectivity: watch::Receiver<bool>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let replica = EntityReplica::open(store, entity_id, seed)?;
        let engine = ReconciliationEngine::new(
            remote,
            config.retry.clone(),
            config.effective_batch_size(),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SyncStatus::default());
        let stats = SyncStats {
            last_sync: replica.meta().last_sync_timestamp,
            ..SyncStats::default()
        };

        let shared = Arc::new(Shared {
            replica,
            engine,
            config,
            connectivity: connectivity.clone(),
            events: events_tx,
            syncing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            cooldown: Mutex::new(Cooldown::default()),
            stats: Mutex::new(stats),
            status: status_tx,
        });
        shared.publish_status();
        info!(
            entity = %shared.replica.entity_id(),
            writes = shared.replica.pending_len(),
            online = shared.is_online(),
            "sync orchestrator started"
        );

        let task = tokio::spawn(run_scheduler(Arc::clone(&shared), events_rx, connectivity));
        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns the entity id.
    pub fn entity_id(&self) -> &EntityId {
        self.shared.replica.entity_id()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Applies a mutation locally and schedules its sync.
    ///
    /// The mutation is visible to [`read_state`](Self::read_state) when this
    /// returns. High-priority writes trigger an immediate pass if online;
    /// other writes extend the debounce window.
    pub fn mutate(&self, kind: MutationKind, payload: Value) -> WriteId {
        let shared = &self.shared;
        let write = shared.replica.record_mutation(kind, payload);

        let event = if !write.is_critical() {
            Some(SyncEvent::Debounce)
        } else if shared.is_online() {
            Some(SyncEvent::Critical)
        } else {
            debug!(entity = %self.entity_id(), write = %write.id, "offline; critical write queued");
            None
        };
        if let Some(event) = event {
            if shared.events.send(event).is_err() {
                debug!(entity = %self.entity_id(), "scheduler stopped; write stays queued");
            }
        }

        shared.publish_status();
        write.id
    }

    /// Returns the current local snapshot.
    pub fn read_state(&self) -> StateSnapshot {
        self.shared.replica.snapshot()
    }

    /// Returns the queued writes in queue order.
    pub fn pending_writes(&self) -> Vec<PendingWrite> {
        self.shared.replica.pending()
    }

    /// Runs a full pass now, ignoring the failure cool-down.
    ///
    /// Works after [`stop_sync`](Self::stop_sync), which only stops
    /// scheduled passes. Returns [`PassOutcome::Skipped`] if offline or
    /// another pass is running.
    pub async fn force_sync(&self) -> SyncResult<PassOutcome> {
        self.shared.run_pass(PassScope::Full, "forced").await
    }

    /// Stops scheduling and waits for the scheduler task to exit.
    ///
    /// A pass already in flight runs to completion first. Mutations keep
    /// working and stay queued until the next
    /// [`force_sync`](Self::force_sync).
    pub async fn stop_sync(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = self.shared.events.send(SyncEvent::Stop);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(entity = %self.entity_id(), error = %err, "scheduler task failed");
            }
        }
        self.shared.publish_status();
        info!(entity = %self.entity_id(), "sync stopped");
    }

    /// Returns true once [`stop_sync`](Self::stop_sync) has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.shared.current_status()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Returns pass statistics.
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.lock().clone()
    }

    /// Returns the emergency backup, if one was written.
    pub fn emergency_backup(&self) -> SyncResult<Option<EmergencyRecord>> {
        self.shared.replica.emergency_backup()
    }

    /// Deletes the emergency backup. Returns true if one existed.
    pub fn clear_emergency(&self) -> SyncResult<bool> {
        self.shared.replica.clear_emergency()
    }
}

impl<R: RemoteStore + 'static, B: SlotBackend + 'static> Drop for SyncOrchestrator<R, B> {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = self.shared.events.send(SyncEvent::Stop);
    }
}

impl<R: RemoteStore, B: SlotBackend> Shared<R, B> {
    fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown
            .lock()
            .until
            .is_some_and(|until| Instant::now() < until)
    }

    fn reset_cooldown(&self) {
        *self.cooldown.lock() = Cooldown::default();
    }

    fn extend_cooldown(&self) -> Duration {
        let base = self.config.failure_cooldown;
        let mut cooldown = self.cooldown.lock();
        cooldown.current = if cooldown.current.is_zero() {
            base
        } else {
            cooldown.current.saturating_mul(2).min(base.saturating_mul(8))
        };
        cooldown.until = Some(Instant::now() + cooldown.current);
        cooldown.current
    }

    fn current_status(&self) -> SyncStatus {
        let (last_error, last_sync) = {
            let stats = self.stats.lock();
            (stats.last_error.clone(), stats.last_sync)
        };
        SyncStatus {
            state: if self.syncing.load(Ordering::Acquire) {
                SyncState::Syncing
            } else {
                SyncState::Idle
            },
            pending: self.replica.pending_len(),
            online: self.is_online(),
            degraded: self.replica.is_degraded(),
            halted: self.halted.load(Ordering::SeqCst),
            last_error,
            last_sync,
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(self.current_status());
    }

    /// Runs one pass under the single-flight guard.
    async fn run_pass(&self, scope: PassScope, trigger: &'static str) -> SyncResult<PassOutcome> {
        let entity = self.replica.entity_id();
        if !self.is_online() {
            debug!(entity = %entity, trigger, "offline; pass skipped");
            return Ok(PassOutcome::Skipped(SkipReason::Offline));
        }
        let Some(guard) = SyncGuard::claim(&self.syncing) else {
            debug!(entity = %entity, trigger, "pass in flight; request coalesced");
            self.rerun.store(true, Ordering::SeqCst);
            return Ok(PassOutcome::Skipped(SkipReason::AlreadySyncing));
        };
        self.publish_status();

        if !self.replica.flush_if_degraded() {
            debug!(entity = %entity, "local persistence still failing");
        }
        let result = self.reconcile_scope(scope).await;
        self.record_result(&result, trigger);

        drop(guard);
        self.publish_status();
        if self.rerun.swap(false, Ordering::SeqCst) && !self.is_stopped() {
            let _ = self.events.send(SyncEvent::Flush);
        }

        result.map(|committed| PassOutcome::Completed { committed })
    }

    async fn reconcile_scope(&self, scope: PassScope) -> SyncResult<usize> {
        match scope {
            PassScope::Critical => {
                let writes = self.replica.pending_with(Priority::High);
                let report = self.engine.reconcile(&self.replica, &writes, true).await?;
                Ok(self.note_report(&report))
            }
            PassScope::Debounced => {
                let writes = self.replica.pending_non_critical();
                let report = self.engine.reconcile(&self.replica, &writes, false).await?;
                Ok(self.note_report(&report))
            }
            PassScope::Full => {
                let mut committed = 0;
                for priority in Priority::ALL {
                    let writes = self.replica.pending_with(priority);
                    let report = self
                        .engine
                        .reconcile(&self.replica, &writes, priority.is_critical())
                        .await?;
                    committed += self.note_report(&report);
                }
                Ok(committed)
            }
        }
    }

    fn note_report(&self, report: &ReconcileReport) -> usize {
        if report.committed.is_empty() {
            return 0;
        }
        let mut stats = self.stats.lock();
        stats.writes_committed += report.committed.len() as u64;
        stats.retries += u64::from(report.retries());
        stats.last_sync = self.replica.meta().last_sync_timestamp;
        report.committed.len()
    }

    fn record_result(&self, result: &SyncResult<usize>, trigger: &'static str) {
        let entity = self.replica.entity_id();
        match result {
            Ok(committed) => {
                {
                    let mut stats = self.stats.lock();
                    stats.passes_completed += 1;
                    stats.last_error = None;
                }
                self.reset_cooldown();
                self.halted.store(false, Ordering::SeqCst);
                if *committed > 0 {
                    info!(entity = %entity, trigger, writes = committed, "sync pass completed");
                } else {
                    debug!(entity = %entity, trigger, "sync pass had nothing to commit");
                }
            }
            Err(err) => {
                {
                    let mut stats = self.stats.lock();
                    stats.passes_failed += 1;
                    stats.last_error = Some(err.to_string());
                    if let SyncError::RetriesExhausted { attempts, .. } = err {
                        stats.retries += u64::from(attempts.saturating_sub(1));
                    }
                }
                let cooldown = self.extend_cooldown();
                let cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
                if err.halts_entity() {
                    self.halted.store(true, Ordering::SeqCst);
                    error!(entity = %entity, trigger, error = %err, "sync halted until repaired");
                } else if matches!(err, SyncError::RetriesExhausted { .. }) {
                    warn!(entity = %entity, trigger, error = %err, cooldown_ms, "sync pass failed");
                } else {
                    error!(entity = %entity, trigger, error = %err, cooldown_ms, "sync pass failed");
                }
            }
        }
    }

    /// Runs a scheduler-initiated pass unless sync is stopped or halted.
    async fn run_scheduled(&self, scope: PassScope, trigger: &'static str) {
        if self.is_stopped() {
            debug!(entity = %self.replica.entity_id(), trigger, "sync stopped; pass skipped");
            return;
        }
        if self.halted.load(Ordering::SeqCst) {
            debug!(entity = %self.replica.entity_id(), trigger, "sync halted; pass skipped");
            return;
        }
        if let Ok(outcome) = self.run_pass(scope, trigger).await {
            debug!(entity = %self.replica.entity_id(), trigger, ?outcome, "scheduled pass finished");
        }
    }

    async fn on_tick(&self) {
        let entity = self.replica.entity_id();
        if self.is_stopped() || !self.is_online() || self.replica.pending_len() == 0 {
            return;
        }
        if self.in_cooldown() {
            debug!(entity = %entity, "cooling down after failure; tick skipped");
            return;
        }
        self.run_scheduled(PassScope::Full, "tick").await;
    }

    async fn on_connectivity(&self, online: bool) {
        let entity = self.replica.entity_id();
        self.publish_status();
        if !online {
            debug!(entity = %entity, "connectivity lost");
            return;
        }
        self.reset_cooldown();
        let pending = self.replica.pending_len();
        info!(entity = %entity, writes = pending, "connectivity restored");
        if pending > 0 {
            self.run_scheduled(PassScope::Full, "connectivity").await;
        }
    }
}

async fn run_scheduler<R: RemoteStore, B: SlotBackend>(
    shared: Arc<Shared<R, B>>,
    mut events: mpsc::UnboundedReceiver<SyncEvent>,
    mut connectivity: watch::Receiver<bool>,
) {
    let entity = shared.replica.entity_id().clone();
    let period = shared.config.tick_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut debounce: Option<Instant> = None;
    let mut watching = true;

    if shared.is_online() && shared.replica.pending_len() > 0 {
        shared.run_scheduled(PassScope::Full, "startup").await;
    }

    loop {
        let quiet = async move {
            match debounce {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = ticker.tick() => {
                shared.on_tick().await;
            }

            event = events.recv() => match event {
                Some(SyncEvent::Critical) => {
                    shared.run_scheduled(PassScope::Critical, "critical").await;
                }
                Some(SyncEvent::Debounce) => {
                    debounce = Some(Instant::now() + shared.config.debounce_window);
                }
                Some(SyncEvent::Flush) => {
                    shared.run_scheduled(PassScope::Full, "follow-up").await;
                }
                Some(SyncEvent::Stop) | None => break,
            },

            changed = connectivity.changed(), if watching => match changed {
                Ok(()) => {
                    let online = *connectivity.borrow_and_update();
                    shared.on_connectivity(online).await;
                }
                Err(_) => {
                    debug!(entity = %entity, "connectivity source closed");
                    watching = false;
                }
            },

            _ = quiet => {
                debounce = None;
                shared.run_scheduled(PassScope::Debounced, "debounce").await;
            }
        }

        if shared.is_stopped() {
            break;
        }
    }

    debug!(entity = %entity, "scheduler exited");
}
