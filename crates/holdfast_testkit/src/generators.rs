//! Property-based test generators using proptest.
//!
//! Provides strategies for generating state values, mutation kinds, and
//! pending writes that hold the queue invariants.

use holdfast_protocol::{
    EntityId, MutationKind, PendingWrite, StateSnapshot, Value, WriteId,
};
use proptest::prelude::*;

/// Strategy for generating valid entity ids.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}")
        .expect("Invalid regex")
        .prop_map(|s| EntityId::new(s).expect("generated id is slot-safe"))
}

/// Strategy for leaf values.
pub fn leaf_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z ]{0,12}".prop_map(Value::Text),
    ]
}

/// Strategy for nested values up to a few levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_value_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-e]{1,3}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for snapshots with a handful of top-level fields.
pub fn snapshot_strategy() -> impl Strategy<Value = StateSnapshot> {
    prop::collection::btree_map("[a-h]{1,4}", value_strategy(), 0..8).prop_map(StateSnapshot::from)
}

/// Strategy for mutation kinds, including custom tags.
pub fn mutation_kind_strategy() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        Just(MutationKind::UpdateHealth),
        Just(MutationKind::UpdateLocation),
        Just(MutationKind::UpdateComaStatus),
        Just(MutationKind::UpdateInventory),
        Just(MutationKind::UpdateStats),
        Just(MutationKind::UpdateTraining),
        Just(MutationKind::UpdateTaskProgress),
        Just(MutationKind::UpdateActionPoints),
        Just(MutationKind::UpdateMovementPoints),
        Just(MutationKind::UpdateCurrency),
        "SET_[A-Z]{1,8}".prop_map(MutationKind::Custom),
    ]
}

/// Strategy for a payload that suits the kind's merge strategy most of the
/// time, and is arbitrary otherwise.
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => (-1_000i64..1_000).prop_map(Value::Integer),
        3 => (-1_000i64..1_000).prop_map(|n| Value::map([("value", Value::Integer(n))])),
        3 => prop::collection::btree_map("[a-h]{1,4}", value_strategy(), 1..4).prop_map(Value::Map),
        1 => value_strategy(),
    ]
}

/// Strategy for a sequence of writes with unique, creation-ordered ids.
pub fn writes_strategy(max_len: usize) -> impl Strategy<Value = Vec<PendingWrite>> {
    prop::collection::vec((mutation_kind_strategy(), payload_strategy()), 0..max_len).prop_map(
        |items| {
            items
                .into_iter()
                .enumerate()
                .map(|(i, (kind, payload))| {
                    let id = WriteId::new(i as u64 + 1);
                    PendingWrite::new(id, kind, payload, 1_700_000_000_000 + i as u64)
                })
                .collect()
        },
    )
}
