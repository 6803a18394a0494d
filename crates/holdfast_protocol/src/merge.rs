//! Merge resolver.
//!
//! Applies a pending write to a snapshot according to the merge strategy of
//! its [`MutationKind`](crate::MutationKind):
//!
//! | Strategy     | Map payload                         | Other payload            |
//! |--------------|-------------------------------------|--------------------------|
//! | `Overwrite`  | replace each named top-level field  | replace the home field   |
//! | `DeepMerge`  | recursive merge, payload leaves win | replace the home field   |
//! | `Accumulate` | add `payload.value` to the counter  | add the bare integer     |
//! | `Shallow`    | replace each named top-level field  | no-op                    |
//!
//! Every function here is total and deterministic.

use crate::mutation::{MergeStrategy, MutationKind};
use crate::snapshot::StateSnapshot;
use crate::value::Value;
use crate::write::PendingWrite;
use std::collections::{BTreeMap, BTreeSet};

/// Returns `snapshot` with `write` applied.
pub fn apply(snapshot: &StateSnapshot, write: &PendingWrite) -> StateSnapshot {
    let mut next = snapshot.clone();
    apply_in_place(&mut next, &write.kind, &write.payload);
    next
}

/// Applies a sequence of writes in the order given.
pub fn fold<'a>(
    snapshot: &StateSnapshot,
    writes: impl IntoIterator<Item = &'a PendingWrite>,
) -> StateSnapshot {
    let mut next = snapshot.clone();
    for write in writes {
        apply_in_place(&mut next, &write.kind, &write.payload);
    }
    next
}

/// Applies one mutation to `snapshot` in place.
pub fn apply_in_place(snapshot: &mut StateSnapshot, kind: &MutationKind, payload: &Value) {
    let fields = snapshot.fields_mut();
    match kind.strategy() {
        MergeStrategy::Overwrite { field } => match payload {
            Value::Map(entries) => overwrite_fields(fields, entries),
            other => {
                fields.insert(field.to_string(), other.clone());
            }
        },
        MergeStrategy::DeepMerge { field } => match payload {
            Value::Map(entries) => merge_maps(fields, entries),
            other => {
                fields.insert(field.to_string(), other.clone());
            }
        },
        MergeStrategy::Accumulate { field } => {
            if let Some(delta) = accumulate_delta(payload) {
                let current = fields.get(field).and_then(Value::as_integer).unwrap_or(0);
                // Wrapping keeps the total independent of application order.
                fields.insert(field.to_string(), Value::Integer(current.wrapping_add(delta)));
            }
        }
        MergeStrategy::Shallow => {
            if let Value::Map(entries) = payload {
                overwrite_fields(fields, entries);
            }
        }
    }
}

/// Returns the top-level snapshot fields that applying this mutation may
/// change.
///
/// Writes whose field sets are disjoint commute.
pub fn touched_fields(kind: &MutationKind, payload: &Value) -> BTreeSet<String> {
    match (kind.strategy(), payload) {
        (MergeStrategy::Overwrite { .. }, Value::Map(entries))
        | (MergeStrategy::DeepMerge { .. }, Value::Map(entries))
        | (MergeStrategy::Shallow, Value::Map(entries)) => entries.keys().cloned().collect(),
        (MergeStrategy::Overwrite { field }, _)
        | (MergeStrategy::DeepMerge { field }, _)
        | (MergeStrategy::Accumulate { field }, _) => BTreeSet::from([field.to_string()]),
        (MergeStrategy::Shallow, _) => BTreeSet::new(),
    }
}

/// Recursively merges `patch` into `target`.
///
/// Where both sides hold a map, keys are merged one by one; anywhere else
/// the patch value replaces the target value. Keys absent from the patch are
/// left untouched.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Map(existing), Value::Map(entries)) => merge_maps(existing, entries),
        (target, patch) => *target = patch.clone(),
    }
}

fn merge_maps(target: &mut BTreeMap<String, Value>, patch: &BTreeMap<String, Value>) {
    for (key, value) in patch {
        match target.get_mut(key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn overwrite_fields(target: &mut BTreeMap<String, Value>, entries: &BTreeMap<String, Value>) {
    for (key, value) in entries {
        target.insert(key.clone(), value.clone());
    }
}

fn accumulate_delta(payload: &Value) -> Option<i64> {
    payload
        .as_integer()
        .or_else(|| payload.get("value").and_then(Value::as_integer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WriteId;
    use proptest::prelude::*;

    fn write(id: u64, kind: MutationKind, payload: Value) -> PendingWrite {
        PendingWrite::new(WriteId::new(id), kind, payload, 0)
    }

    fn player() -> StateSnapshot {
        StateSnapshot::from_fields([
            ("health", Value::from(100)),
            ("action_points", Value::from(5)),
            (
                "inventory",
                Value::map([
                    ("sword", Value::from(1)),
                    ("potions", Value::map([("small", Value::from(2))])),
                ]),
            ),
        ])
    }

    #[test]
    fn overwrite_scalar_targets_home_field() {
        let next = apply(&player(), &write(1, MutationKind::UpdateHealth, Value::from(40)));
        assert_eq!(next.integer("health"), Some(40));
    }

    #[test]
    fn overwrite_map_replaces_fields_wholesale() {
        let snapshot = StateSnapshot::from_fields([(
            "location",
            Value::map([("x", Value::from(1)), ("y", Value::from(2))]),
        )]);
        let next = apply(
            &snapshot,
            &write(
                1,
                MutationKind::UpdateLocation,
                Value::map([("location", Value::map([("x", Value::from(9))]))]),
            ),
        );

        assert_eq!(
            next.get("location"),
            Some(&Value::map([("x", Value::from(9))]))
        );
    }

    #[test]
    fn coma_status_sets_flag() {
        let next = apply(
            &player(),
            &write(1, MutationKind::UpdateComaStatus, Value::from(true)),
        );
        assert_eq!(next.get("incapacitated"), Some(&Value::Bool(true)));
    }

    #[test]
    fn deep_merge_keeps_missing_keys() {
        let patch = Value::map([(
            "inventory",
            Value::map([
                ("shield", Value::from(1)),
                ("potions", Value::map([("large", Value::from(1))])),
            ]),
        )]);
        let next = apply(&player(), &write(1, MutationKind::UpdateInventory, patch));

        assert_eq!(next.get_path(&["inventory", "sword"]), Some(&Value::Integer(1)));
        assert_eq!(next.get_path(&["inventory", "shield"]), Some(&Value::Integer(1)));
        assert_eq!(
            next.get_path(&["inventory", "potions", "small"]),
            Some(&Value::Integer(2))
        );
        assert_eq!(
            next.get_path(&["inventory", "potions", "large"]),
            Some(&Value::Integer(1))
        );
        assert_eq!(next.integer("health"), Some(100));
    }

    #[test]
    fn deep_merge_payload_leaf_wins() {
        let patch = Value::map([(
            "inventory",
            Value::map([("potions", Value::from("none"))]),
        )]);
        let next = apply(&player(), &write(1, MutationKind::UpdateInventory, patch));
        assert_eq!(
            next.get_path(&["inventory", "potions"]),
            Some(&Value::from("none"))
        );
    }

    #[test]
    fn accumulate_adds_to_existing_or_zero() {
        let next = apply(
            &player(),
            &write(
                1,
                MutationKind::UpdateActionPoints,
                Value::map([("value", Value::from(-2))]),
            ),
        );
        assert_eq!(next.integer("action_points"), Some(3));

        let next = apply(
            &player(),
            &write(2, MutationKind::UpdateMovementPoints, Value::from(4)),
        );
        assert_eq!(next.integer("movement_points"), Some(4));
    }

    #[test]
    fn accumulate_ignores_non_integer_payload() {
        let next = apply(
            &player(),
            &write(1, MutationKind::UpdateCurrency, Value::from("lots")),
        );
        assert_eq!(next, player());
    }

    #[test]
    fn accumulate_over_non_integer_field_starts_from_zero() {
        let snapshot = StateSnapshot::from_fields([("currency", Value::from("broken"))]);
        let next = apply(
            &snapshot,
            &write(1, MutationKind::UpdateCurrency, Value::from(7)),
        );
        assert_eq!(next.integer("currency"), Some(7));
    }

    #[test]
    fn custom_kind_is_shallow() {
        let patch = Value::map([
            ("title", Value::from("Warden")),
            ("inventory", Value::map([("only", Value::from(1))])),
        ]);
        let next = apply(&player(), &write(1, MutationKind::from_tag("SET_TITLE"), patch));

        assert_eq!(next.get("title"), Some(&Value::from("Warden")));
        assert_eq!(
            next.get("inventory"),
            Some(&Value::map([("only", Value::from(1))]))
        );

        let unchanged = apply(
            &player(),
            &write(2, MutationKind::from_tag("SET_TITLE"), Value::from(3)),
        );
        assert_eq!(unchanged, player());
    }

    #[test]
    fn fold_applies_in_order() {
        let writes = vec![
            write(1, MutationKind::UpdateHealth, Value::from(80)),
            write(2, MutationKind::UpdateHealth, Value::from(60)),
        ];
        let next = fold(&player(), &writes);
        assert_eq!(next.integer("health"), Some(60));
    }

    #[test]
    fn touched_fields_follow_strategy() {
        let fields = |kind: MutationKind, payload: Value| -> Vec<String> {
            touched_fields(&kind, &payload).into_iter().collect()
        };

        assert_eq!(fields(MutationKind::UpdateHealth, Value::from(10)), ["health"]);
        assert_eq!(
            fields(
                MutationKind::UpdateHealth,
                Value::map([("health", Value::from(1)), ("incapacitated", Value::from(true))])
            ),
            ["health", "incapacitated"]
        );
        assert_eq!(
            fields(MutationKind::UpdateCurrency, Value::map([("value", Value::from(3))])),
            ["currency"]
        );
        assert_eq!(
            fields(MutationKind::Custom("RESPAWN".into()), Value::map([("health", Value::from(10))])),
            ["health"]
        );
        assert!(fields(MutationKind::Custom("NOOP".into()), Value::from(1)).is_empty());
    }

    fn any_kind() -> impl Strategy<Value = MutationKind> {
        prop_oneof![
            idempotent_kind(),
            Just(MutationKind::UpdateActionPoints),
            Just(MutationKind::UpdateMovementPoints),
            Just(MutationKind::UpdateCurrency),
            "[A-Z]{1,6}".prop_map(MutationKind::Custom),
        ]
    }

    fn any_payload() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::Integer),
            prop::collection::btree_map("[a-f]", small_value(), 0..3).prop_map(Value::Map),
            small_value(),
        ]
    }

    fn small_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            "[a-z]{0,6}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-d]", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    fn snapshot_strategy() -> impl Strategy<Value = StateSnapshot> {
        prop::collection::btree_map("[a-f]", small_value(), 0..6).prop_map(StateSnapshot::from)
    }

    fn idempotent_kind() -> impl Strategy<Value = MutationKind> {
        prop_oneof![
            Just(MutationKind::UpdateHealth),
            Just(MutationKind::UpdateLocation),
            Just(MutationKind::UpdateComaStatus),
            Just(MutationKind::UpdateInventory),
            Just(MutationKind::UpdateStats),
            Just(MutationKind::UpdateTraining),
            Just(MutationKind::UpdateTaskProgress),
        ]
    }

    proptest! {
        #[test]
        fn accumulate_is_order_independent(
            start in any::<i64>(),
            deltas in prop::collection::vec(any::<i64>(), 0..16),
            seed in any::<u64>(),
        ) {
            let snapshot = StateSnapshot::from_fields([("action_points", Value::Integer(start))]);
            let writes: Vec<PendingWrite> = deltas
                .iter()
                .enumerate()
                .map(|(i, d)| write(i as u64, MutationKind::UpdateActionPoints, Value::map([("value", Value::Integer(*d))])))
                .collect();

            let mut shuffled = writes.clone();
            // Deterministic permutation derived from the seed.
            let len = shuffled.len();
            for i in (1..len).rev() {
                let j = (seed.wrapping_mul(i as u64 + 1) % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
            let mut reversed = writes.clone();
            reversed.reverse();

            let forward = fold(&snapshot, &writes);
            prop_assert_eq!(&fold(&snapshot, &shuffled), &forward);
            prop_assert_eq!(&fold(&snapshot, &reversed), &forward);
        }

        #[test]
        fn overwrite_and_deep_merge_are_idempotent(
            snapshot in snapshot_strategy(),
            kind in idempotent_kind(),
            payload in small_value(),
        ) {
            let w = write(1, kind, payload);
            let once = apply(&snapshot, &w);
            let twice = apply(&once, &w);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn apply_changes_only_touched_fields(
            snapshot in snapshot_strategy(),
            kind in any_kind(),
            payload in any_payload(),
        ) {
            let touched = touched_fields(&kind, &payload);
            let next = apply(&snapshot, &write(1, kind, payload));
            for (field, value) in snapshot.fields() {
                if !touched.contains(field) {
                    prop_assert_eq!(next.get(field), Some(value));
                }
            }
            for field in next.fields().keys() {
                prop_assert!(touched.contains(field) || snapshot.get(field).is_some());
            }
        }

        #[test]
        fn disjoint_writes_commute(
            snapshot in snapshot_strategy(),
            first in (any_kind(), any_payload()),
            second in (any_kind(), any_payload()),
        ) {
            let a = write(1, first.0, first.1);
            let b = write(2, second.0, second.1);
            prop_assume!(touched_fields(&a.kind, &a.payload).is_disjoint(&touched_fields(&b.kind, &b.payload)));
            prop_assert_eq!(fold(&snapshot, [&a, &b]), fold(&snapshot, [&b, &a]));
        }

        #[test]
        fn apply_is_deterministic(snapshot in snapshot_strategy(), payload in small_value()) {
            let w = write(1, MutationKind::UpdateInventory, payload);
            prop_assert_eq!(apply(&snapshot, &w), apply(&snapshot, &w));
        }
    }
}
