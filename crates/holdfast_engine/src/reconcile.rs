//! Remote reconciliation: fetch, fold, commit, prune.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::replica::EntityReplica;
use holdfast_protocol::{merge, now_millis, PendingWrite, StateSnapshot, Value, WriteId};
use holdfast_storage::SlotBackend;
use std::sync::Arc;
use tracing::{debug, warn};

/// Field stamped on snapshots committed by a critical pass.
pub const LAST_CRITICAL_SYNC_FIELD: &str = "last_critical_sync";

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids removed from the queue, in commit order.
    pub committed: Vec<WriteId>,
    /// Number of commits made.
    pub chunks: usize,
    /// Total remote attempts across all chunks.
    pub attempts: u32,
}

impl ReconcileReport {
    /// Attempts beyond the first for each chunk.
    pub fn retries(&self) -> u32 {
        self.attempts
            .saturating_sub(u32::try_from(self.chunks).unwrap_or(u32::MAX))
    }

    fn absorb(&mut self, other: ReconcileReport) {
        self.committed.extend(other.committed);
        self.chunks += other.chunks;
        self.attempts += other.attempts;
    }
}

/// Reconciles queued writes against the remote store.
///
/// One pass fetches the remote snapshot, folds the writes over it,
/// commits the result as a single document write, and then prunes exactly
/// the committed writes from the local queue. Transient failures retry the
/// whole fetch-fold-commit with exponential backoff.
///
/// Each commit also carries any earlier queued write that touches the same
/// fields, and is folded in creation order, so the remote ends up where the
/// local snapshot already is.
pub struct ReconciliationEngine<R: RemoteStore> {
    remote: Arc<R>,
    retry: RetryConfig,
    batch_size: usize,
}

impl<R: RemoteStore> ReconciliationEngine<R> {
    /// Creates an engine.
    pub fn new(remote: Arc<R>, retry: RetryConfig, batch_size: usize) -> Self {
        Self {
            remote,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Returns the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Reconciles `writes` for the replica's entity.
    ///
    /// Critical batches are committed in one piece and stamped with
    /// [`LAST_CRITICAL_SYNC_FIELD`]. Other batches larger than the batch
    /// size are committed in sequential chunks; a failing chunk stops the
    /// rest, but chunks already committed stay committed. Writes that are
    /// no longer queued are skipped.
    ///
    /// # Errors
    ///
    /// - [`SyncError::RetriesExhausted`] when transient failures reach the
    ///   retry ceiling
    /// - [`SyncError::RemoteEntityMissing`], [`SyncError::LocalStateMissing`],
    ///   [`SyncError::RemotePermanent`] without retrying
    ///
    /// On error the failed writes remain queued.
    pub async fn reconcile<B: SlotBackend>(
        &self,
        replica: &EntityReplica<B>,
        writes: &[PendingWrite],
        is_critical: bool,
    ) -> SyncResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if writes.is_empty() {
            return Ok(report);
        }

        let chunk_size = if is_critical {
            writes.len()
        } else {
            self.batch_size
        };
        for chunk in writes.chunks(chunk_size) {
            let batch = replica.commit_set(chunk);
            if batch.is_empty() {
                continue;
            }
            if batch.len() > chunk.len() {
                debug!(
                    entity = %replica.entity_id(),
                    pulled = batch.len() - chunk.len(),
                    "earlier writes to the same fields joined the batch"
                );
            }
            let critical = is_critical || batch.iter().any(PendingWrite::is_critical);
            report.absorb(self.commit_chunk(replica, &batch, critical).await?);
        }
        Ok(report)
    }

    async fn commit_chunk<B: SlotBackend>(
        &self,
        replica: &EntityReplica<B>,
        chunk: &[PendingWrite],
        is_critical: bool,
    ) -> SyncResult<ReconcileReport> {
        let entity = replica.entity_id();
        let max_attempts = self.retry.attempts();
        let mut attempt = 0;

        loop {
            let delay = self.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                warn!(
                    entity = %entity,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying reconciliation"
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(replica, chunk, is_critical).await {
                Ok(committed) => {
                    let ids: Vec<WriteId> = chunk.iter().map(|w| w.id).collect();
                    let removed = replica.apply_commit(&ids, committed, now_millis());
                    debug!(entity = %entity, writes = removed, attempts = attempt + 1, "chunk committed");
                    return Ok(ReconcileReport {
                        committed: ids,
                        chunks: 1,
                        attempts: attempt + 1,
                    });
                }
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(SyncError::RetriesExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                    debug!(entity = %entity, attempt, error = %err, "transient remote failure");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt<B: SlotBackend>(
        &self,
        replica: &EntityReplica<B>,
        chunk: &[PendingWrite],
        is_critical: bool,
    ) -> SyncResult<StateSnapshot> {
        let entity = replica.entity_id();

        let remote = self
            .remote
            .fetch(entity)
            .await?
            .ok_or_else(|| SyncError::RemoteEntityMissing(entity.clone()))?;
        if replica.sync_base()?.is_none() {
            return Err(SyncError::LocalStateMissing(entity.clone()));
        }

        let mut merged = merge::fold(&remote, chunk);
        if is_critical {
            let stamp = i64::try_from(now_millis()).unwrap_or(i64::MAX);
            merged.set(LAST_CRITICAL_SYNC_FIELD, Value::Integer(stamp));
        }

        self.remote.commit(entity, &merged).await?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteError};
    use crate::store::LocalStateStore;
    use holdfast_protocol::{EntityId, MutationKind};
    use holdfast_storage::InMemoryBackend;
    use std::time::Duration;

    fn entity() -> EntityId {
        EntityId::new("player-1").unwrap()
    }

    fn seed() -> StateSnapshot {
        StateSnapshot::from_fields([("health", Value::from(100)), ("currency", Value::from(0))])
    }

    fn setup() -> (Arc<MemoryRemoteStore>, EntityReplica<InMemoryBackend>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.insert(entity(), seed());
        let store = Arc::new(LocalStateStore::new(InMemoryBackend::new()));
        let replica = EntityReplica::open(store, entity(), seed()).unwrap();
        (remote, replica)
    }

    fn fast_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts).with_initial_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);

        let report = engine.reconcile(&replica, &[], false).await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn commits_and_prunes() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);

        replica.record_mutation(MutationKind::UpdateCurrency, Value::from(5));
        replica.record_mutation(MutationKind::UpdateCurrency, Value::from(7));
        let writes = replica.pending();

        let report = engine.reconcile(&replica, &writes, false).await.unwrap();
        assert_eq!(report.committed.len(), 2);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.retries(), 0);

        assert_eq!(replica.pending_len(), 0);
        assert_eq!(remote.get(&entity()).unwrap().integer("currency"), Some(12));
        assert_eq!(replica.meta().last_synced, remote.get(&entity()));
        assert!(replica.meta().last_sync_timestamp.is_some());
    }

    #[tokio::test]
    async fn critical_pass_is_stamped() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);

        replica.record_mutation(MutationKind::UpdateHealth, Value::from(40));
        let writes = replica.pending();
        engine.reconcile(&replica, &writes, true).await.unwrap();

        let committed = remote.get(&entity()).unwrap();
        assert_eq!(committed.integer("health"), Some(40));
        assert!(committed.integer(LAST_CRITICAL_SYNC_FIELD).is_some());
        assert_eq!(replica.snapshot(), committed);
    }

    #[tokio::test]
    async fn folds_over_remote_state() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);

        replica.record_mutation(MutationKind::UpdateCurrency, Value::from(5));
        remote.insert(
            entity(),
            StateSnapshot::from_fields([("health", Value::from(100)), ("currency", Value::from(50))]),
        );

        let writes = replica.pending();
        engine.reconcile(&replica, &writes, false).await.unwrap();
        assert_eq!(remote.get(&entity()).unwrap().integer("currency"), Some(55));
        assert_eq!(replica.snapshot().integer("currency"), Some(55));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);
        remote.fail_next_commits([RemoteError::transient("reset"), RemoteError::transient("reset")]);
        remote.fail_next_fetches([RemoteError::transient("dns")]);

        replica.record_mutation(MutationKind::UpdateCurrency, Value::from(1));
        let writes = replica.pending();

        // Attempt 1 fails on fetch, attempt 2 on commit, attempt 3 on commit.
        let result = engine.reconcile(&replica, &writes, false).await;
        assert!(matches!(
            result,
            Err(SyncError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(replica.pending_len(), 1);

        remote.fail_next_commits([RemoteError::transient("reset")]);
        let report = engine.reconcile(&replica, &writes, false).await.unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.retries(), 1);
        assert_eq!(replica.pending_len(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(5), 10);
        remote.fail_next_commits([RemoteError::permanent("forbidden")]);

        replica.record_mutation(MutationKind::UpdateCurrency, Value::from(1));
        let writes = replica.pending();

        let result = engine.reconcile(&replica, &writes, false).await;
        assert!(matches!(result, Err(SyncError::RemotePermanent(_))));
        assert_eq!(remote.commit_count(), 1);
        assert_eq!(replica.pending_len(), 1);
    }

    #[tokio::test]
    async fn missing_remote_entity() {
        let (remote, replica) = setup();
        remote.remove(&entity());
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);

        replica.record_mutation(MutationKind::UpdateCurrency, Value::from(1));
        let writes = replica.pending();

        let result = engine.reconcile(&replica, &writes, false).await;
        assert!(matches!(result, Err(SyncError::RemoteEntityMissing(_))));
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(remote.commit_count(), 0);
    }

    #[tokio::test]
    async fn missing_local_state() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);

        replica.record_mutation(MutationKind::UpdateCurrency, Value::from(1));
        let writes = replica.pending();
        replica.store().backend().clear();

        let result = engine.reconcile(&replica, &writes, false).await;
        assert!(matches!(result, Err(SyncError::LocalStateMissing(_))));
        assert_eq!(remote.commit_count(), 0);
    }

    #[tokio::test]
    async fn degraded_replica_syncs_from_memory() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.insert(entity(), seed());
        let store = Arc::new(LocalStateStore::new(InMemoryBackend::new()));
        store.backend().fail_writes_with_suffix(".state");
        let replica = EntityReplica::open(store, entity(), seed()).unwrap();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);

        replica.record_mutation(MutationKind::UpdateHealth, Value::from(40));
        assert!(replica.is_degraded());
        assert!(replica.durable_snapshot().unwrap().is_none());

        let writes = replica.pending();
        engine.reconcile(&replica, &writes, true).await.unwrap();
        assert_eq!(remote.get(&entity()).unwrap().integer("health"), Some(40));
        assert_eq!(replica.pending_len(), 0);
    }

    #[tokio::test]
    async fn same_field_writes_commit_in_call_order() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(3), 10);

        replica.record_mutation(
            MutationKind::Custom("RESPAWN".into()),
            Value::map([("health", Value::from(10))]),
        );
        replica.record_mutation(MutationKind::UpdateCurrency, Value::from(5));
        replica.record_mutation(MutationKind::UpdateHealth, Value::from(70));

        let critical = replica.pending_with(holdfast_protocol::Priority::High);
        let report = engine.reconcile(&replica, &critical, true).await.unwrap();

        // The earlier low-priority write to `health` rides along; currency waits.
        assert_eq!(report.committed, vec![WriteId::new(1), WriteId::new(3)]);
        assert_eq!(remote.get(&entity()).unwrap().integer("health"), Some(70));
        assert_eq!(replica.snapshot().integer("health"), Some(70));
        assert_eq!(replica.pending_len(), 1);

        let rest = replica.pending();
        engine.reconcile(&replica, &rest, false).await.unwrap();
        assert_eq!(remote.get(&entity()).unwrap().integer("health"), Some(70));
        assert_eq!(replica.snapshot(), remote.get(&entity()).unwrap());
    }

    #[tokio::test]
    async fn large_batches_are_chunked() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), fast_retry(1), 2);

        for _ in 0..5 {
            replica.record_mutation(MutationKind::UpdateCurrency, Value::from(1));
        }
        let writes = replica.pending();

        let report = engine.reconcile(&replica, &writes, false).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(remote.committed().len(), 3);
        assert_eq!(remote.get(&entity()).unwrap().integer("currency"), Some(5));
    }

    #[tokio::test]
    async fn failed_chunk_keeps_earlier_chunks() {
        let (remote, replica) = setup();
        let engine = ReconciliationEngine::new(Arc::clone(&remote), RetryConfig::no_retry(), 2);

        for _ in 0..6 {
            replica.record_mutation(MutationKind::UpdateCurrency, Value::from(1));
        }
        let writes = replica.pending();
        remote.script_commits([Ok(()), Err(RemoteError::transient("flap"))]);

        let result = engine.reconcile(&replica, &writes, false).await;
        assert!(matches!(result, Err(SyncError::RetriesExhausted { attempts: 1, .. })));

        // The first chunk stays committed; the failed and unattempted chunks stay queued.
        assert_eq!(remote.commit_count(), 2);
        assert_eq!(remote.get(&entity()).unwrap().integer("currency"), Some(2));
        assert_eq!(replica.pending_len(), 4);
        assert_eq!(replica.snapshot().integer("currency"), Some(6));
    }
}
