//! Priority-ordered pending-write log.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::WriteId;
use crate::mutation::Priority;
use crate::write::PendingWrite;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The ordered list of writes awaiting remote commit.
///
/// # Invariants
///
/// - Writes are sorted by priority (high, medium, low), then by id
/// - Every id appears at most once
///
/// The log itself does no I/O; it is persisted as part of the entity's
/// primary record. Decoded logs must be checked with
/// [`PendingWriteLog::validate`] before use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingWriteLog {
    writes: Vec<PendingWrite>,
}

impl PendingWriteLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log from arbitrary writes, sorting them and dropping
    /// duplicate ids (the first occurrence wins).
    pub fn rebuilt(writes: impl IntoIterator<Item = PendingWrite>) -> Self {
        let mut log = Self::new();
        log.replace_all(writes);
        log
    }

    /// Adds a write at its ordered position.
    ///
    /// Returns `false` without changing the log if a write with the same id
    /// is already queued.
    pub fn enqueue(&mut self, write: PendingWrite) -> bool {
        if self.contains(write.id) {
            return false;
        }
        let key = write.queue_key();
        let index = self.writes.partition_point(|w| w.queue_key() < key);
        self.writes.insert(index, write);
        true
    }

    /// Returns all writes in queue order.
    pub fn list_all(&self) -> &[PendingWrite] {
        &self.writes
    }

    /// Removes the writes with the given ids and returns how many were
    /// removed. Unknown ids are ignored.
    pub fn remove_by_ids(&mut self, ids: &[WriteId]) -> usize {
        let ids: BTreeSet<WriteId> = ids.iter().copied().collect();
        let before = self.writes.len();
        self.writes.retain(|w| !ids.contains(&w.id));
        before - self.writes.len()
    }

    /// Replaces the whole log, restoring the ordering invariant.
    pub fn replace_all(&mut self, writes: impl IntoIterator<Item = PendingWrite>) {
        let mut seen = BTreeSet::new();
        let mut writes: Vec<PendingWrite> = writes
            .into_iter()
            .filter(|w| seen.insert(w.id))
            .collect();
        writes.sort_by_key(PendingWrite::queue_key);
        self.writes = writes;
    }

    /// Returns the writes of one priority, in creation order.
    pub fn by_priority(&self, priority: Priority) -> Vec<PendingWrite> {
        self.writes
            .iter()
            .filter(|w| w.priority == priority)
            .cloned()
            .collect()
    }

    /// Returns all medium and low priority writes, in queue order.
    pub fn non_critical(&self) -> Vec<PendingWrite> {
        self.writes
            .iter()
            .filter(|w| !w.is_critical())
            .cloned()
            .collect()
    }

    /// Returns all writes in creation order, regardless of priority.
    pub fn in_creation_order(&self) -> Vec<&PendingWrite> {
        let mut writes: Vec<&PendingWrite> = self.writes.iter().collect();
        writes.sort_by_key(|w| w.id);
        writes
    }

    /// Expands `batch` into the set of writes that can be committed together.
    ///
    /// Any queued write created before a selected write that touches one of
    /// the same top-level fields is pulled in, transitively. Folding the
    /// result in creation order therefore gives every field the value the
    /// local snapshot saw, and the writes left behind commute with it.
    ///
    /// Returns the writes in creation order.
    pub fn commit_set(&self, batch: &[PendingWrite]) -> Vec<PendingWrite> {
        let mut selected: BTreeMap<WriteId, (PendingWrite, BTreeSet<String>)> = batch
            .iter()
            .map(|w| (w.id, (w.clone(), w.touched_fields())))
            .collect();

        loop {
            let mut pulled = Vec::new();
            for write in &self.writes {
                if selected.contains_key(&write.id) {
                    continue;
                }
                let fields = write.touched_fields();
                let conflicts = selected
                    .range(write.id..)
                    .any(|(_, (_, theirs))| !theirs.is_disjoint(&fields));
                if conflicts {
                    pulled.push((write.id, (write.clone(), fields)));
                }
            }
            if pulled.is_empty() {
                break;
            }
            selected.extend(pulled);
        }

        selected.into_values().map(|(write, _)| write).collect()
    }

    /// Returns true if a write with this id is queued.
    pub fn contains(&self, id: WriteId) -> bool {
        self.writes.iter().any(|w| w.id == id)
    }

    /// Returns the highest queued id.
    pub fn max_id(&self) -> Option<WriteId> {
        self.writes.iter().map(|w| w.id).max()
    }

    /// Returns the number of queued writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Checks the ordering and uniqueness invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::QueueCorruption`] describing the first
    /// violation found.
    pub fn validate(&self) -> ProtocolResult<()> {
        let mut seen = BTreeSet::new();
        for write in &self.writes {
            if !seen.insert(write.id) {
                return Err(ProtocolError::queue_corruption(format!(
                    "duplicate write id {}",
                    write.id
                )));
            }
            if write.priority != write.kind.priority() {
                return Err(ProtocolError::queue_corruption(format!(
                    "write {} has priority {} but kind {} implies {}",
                    write.id,
                    write.priority,
                    write.kind,
                    write.kind.priority()
                )));
            }
        }
        for pair in self.writes.windows(2) {
            if pair[0].queue_key() >= pair[1].queue_key() {
                return Err(ProtocolError::queue_corruption(format!(
                    "write {} ({}) is queued before {} ({})",
                    pair[0].id, pair[0].priority, pair[1].id, pair[1].priority
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationKind;
    use crate::value::Value;
    use proptest::prelude::*;

    fn make_write(id: u64, kind: MutationKind) -> PendingWrite {
        PendingWrite::new(WriteId::new(id), kind, Value::from(1), id)
    }

    fn kind_for(priority: Priority) -> MutationKind {
        match priority {
            Priority::High => MutationKind::UpdateHealth,
            Priority::Medium => MutationKind::UpdateInventory,
            Priority::Low => MutationKind::UpdateStats,
        }
    }

    fn ids(log: &PendingWriteLog) -> Vec<u64> {
        log.list_all().iter().map(|w| w.id.get()).collect()
    }

    #[test]
    fn enqueue_orders_by_priority_then_id() {
        let mut log = PendingWriteLog::new();
        log.enqueue(make_write(1, MutationKind::UpdateStats));
        log.enqueue(make_write(2, MutationKind::UpdateInventory));
        log.enqueue(make_write(3, MutationKind::UpdateHealth));
        log.enqueue(make_write(4, MutationKind::UpdateCurrency));
        log.enqueue(make_write(5, MutationKind::UpdateLocation));

        assert_eq!(ids(&log), vec![3, 5, 2, 4, 1]);
        assert!(log.validate().is_ok());
    }

    #[test]
    fn commit_set_pulls_in_earlier_writes_to_the_same_field() {
        let mut log = PendingWriteLog::new();
        let respawn = PendingWrite::new(
            WriteId::new(1),
            MutationKind::Custom("RESPAWN".into()),
            Value::map([("health", Value::from(10)), ("spawn", Value::from("camp"))]),
            1,
        );
        log.enqueue(respawn);
        log.enqueue(make_write(2, MutationKind::UpdateStats));
        log.enqueue(PendingWrite::new(
            WriteId::new(3),
            MutationKind::Custom("SPAWN".into()),
            Value::map([("spawn", Value::from("harbor"))]),
            3,
        ));
        log.enqueue(PendingWrite::new(WriteId::new(4), MutationKind::UpdateHealth, Value::from(70), 4));

        let batch = log.by_priority(Priority::High);
        let set: Vec<u64> = log.commit_set(&batch).iter().map(|w| w.id.get()).collect();

        // 1 shares `health` with 4; 3 shares `spawn` with 1 but comes later,
        // so it can stay behind. 2 touches neither.
        assert_eq!(set, vec![1, 4]);
    }

    #[test]
    fn commit_set_is_transitive() {
        let custom = |id: u64, keys: &[&str]| {
            PendingWrite::new(
                WriteId::new(id),
                MutationKind::Custom("SET".into()),
                Value::map(keys.iter().map(|k| (*k, Value::from(id as i64)))),
                id,
            )
        };
        let mut log = PendingWriteLog::new();
        log.enqueue(custom(1, &["b"]));
        log.enqueue(custom(2, &["a", "b"]));
        log.enqueue(PendingWrite::new(
            WriteId::new(3),
            MutationKind::UpdateHealth,
            Value::map([("a", Value::from(1))]),
            3,
        ));

        let batch = log.by_priority(Priority::High);
        let set: Vec<u64> = log.commit_set(&batch).iter().map(|w| w.id.get()).collect();
        assert_eq!(set, vec![1, 2, 3]);
    }

    #[test]
    fn enqueue_is_idempotent_by_id() {
        let mut log = PendingWriteLog::new();
        assert!(log.enqueue(make_write(1, MutationKind::UpdateHealth)));
        assert!(!log.enqueue(make_write(1, MutationKind::UpdateHealth)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn remove_by_ids_removes_exactly_those() {
        let mut log = PendingWriteLog::new();
        for id in 1..=5 {
            log.enqueue(make_write(id, MutationKind::UpdateInventory));
        }

        let removed = log.remove_by_ids(&[WriteId::new(2), WriteId::new(4), WriteId::new(99)]);
        assert_eq!(removed, 2);
        assert_eq!(ids(&log), vec![1, 3, 5]);
    }

    #[test]
    fn replace_all_sorts_and_dedups() {
        let mut log = PendingWriteLog::new();
        log.replace_all(vec![
            make_write(3, MutationKind::UpdateStats),
            make_write(1, MutationKind::UpdateHealth),
            make_write(3, MutationKind::UpdateStats),
            make_write(2, MutationKind::UpdateCurrency),
        ]);

        assert_eq!(ids(&log), vec![1, 2, 3]);
        assert!(log.validate().is_ok());
    }

    #[test]
    fn grouping_helpers() {
        let log = PendingWriteLog::rebuilt(vec![
            make_write(1, MutationKind::UpdateStats),
            make_write(2, MutationKind::UpdateHealth),
            make_write(3, MutationKind::UpdateInventory),
        ]);

        assert_eq!(log.by_priority(Priority::High).len(), 1);
        assert_eq!(
            log.non_critical().iter().map(|w| w.id.get()).collect::<Vec<_>>(),
            vec![3, 1]
        );
        assert_eq!(
            log.in_creation_order().iter().map(|w| w.id.get()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(log.max_id(), Some(WriteId::new(3)));
    }

    #[test]
    fn validate_detects_misordering() {
        let log: PendingWriteLog = serde_json::from_value(serde_json::json!([
            {"id": 1, "kind": "UPDATE_STATS", "payload": 1, "created_at": 1, "priority": "low"},
            {"id": 2, "kind": "UPDATE_HEALTH", "payload": 1, "created_at": 2, "priority": "high"},
        ]))
        .unwrap();

        assert!(matches!(log.validate(), Err(ProtocolError::QueueCorruption(_))));
    }

    #[test]
    fn validate_detects_duplicates_and_bad_priority() {
        let duplicated: PendingWriteLog = serde_json::from_value(serde_json::json!([
            {"id": 1, "kind": "UPDATE_HEALTH", "payload": 1, "created_at": 1, "priority": "high"},
            {"id": 1, "kind": "UPDATE_STATS", "payload": 1, "created_at": 1, "priority": "low"},
        ]))
        .unwrap();
        assert!(duplicated.validate().is_err());

        let mislabeled: PendingWriteLog = serde_json::from_value(serde_json::json!([
            {"id": 1, "kind": "UPDATE_STATS", "payload": 1, "created_at": 1, "priority": "high"},
        ]))
        .unwrap();
        assert!(mislabeled.validate().is_err());
    }

    fn priority_strategy() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::High),
            Just(Priority::Medium),
            Just(Priority::Low)
        ]
    }

    proptest! {
        #[test]
        fn interleaved_enqueue_keeps_priority_groups(priorities in prop::collection::vec(priority_strategy(), 0..64)) {
            let mut log = PendingWriteLog::new();
            for (i, priority) in priorities.iter().enumerate() {
                log.enqueue(make_write(i as u64 + 1, kind_for(*priority)));
            }

            prop_assert!(log.validate().is_ok());
            let order: Vec<Priority> = log.list_all().iter().map(|w| w.priority).collect();
            let mut sorted = order.clone();
            sorted.sort();
            prop_assert_eq!(order, sorted);
            prop_assert_eq!(log.len(), priorities.len());
        }

        #[test]
        fn removal_never_breaks_order(
            priorities in prop::collection::vec(priority_strategy(), 1..32),
            remove_mask in prop::collection::vec(any::<bool>(), 32),
        ) {
            let mut log = PendingWriteLog::new();
            for (i, priority) in priorities.iter().enumerate() {
                log.enqueue(make_write(i as u64 + 1, kind_for(*priority)));
            }
            let doomed: Vec<WriteId> = (0..priorities.len())
                .filter(|i| remove_mask[*i])
                .map(|i| WriteId::new(i as u64 + 1))
                .collect();

            log.remove_by_ids(&doomed);

            prop_assert!(log.validate().is_ok());
            for id in &doomed {
                prop_assert!(!log.contains(*id));
            }
            prop_assert_eq!(log.len(), priorities.len() - doomed.len());
        }
    }
}
