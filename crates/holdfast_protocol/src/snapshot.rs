//! Per-entity state snapshot.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The full materialized state of one entity at a point in time.
///
/// A snapshot is a mapping from top-level field name to [`Value`]: numeric
/// counters, nested stat blocks, collections, and status flags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot {
    fields: BTreeMap<String, Value>,
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a snapshot from field/value pairs.
    pub fn from_fields<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Returns a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Follows a path through nested maps, starting at a top-level field.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        self.fields.get(*first)?.get_path(rest)
    }

    /// Returns a top-level integer field.
    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_integer)
    }

    /// Sets a top-level field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    /// Removes a top-level field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns all top-level fields.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.fields
    }

    /// Returns the number of top-level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the snapshot has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Converts the snapshot into a map value.
    pub fn into_value(self) -> Value {
        Value::Map(self.fields)
    }
}

impl From<BTreeMap<String, Value>> for StateSnapshot {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_access() {
        let mut snapshot = StateSnapshot::from_fields([
            ("health", Value::from(100)),
            ("stats", Value::map([("str", Value::from(10))])),
        ]);

        assert_eq!(snapshot.integer("health"), Some(100));
        assert_eq!(snapshot.get_path(&["stats", "str"]), Some(&Value::Integer(10)));
        assert!(snapshot.get_path(&[]).is_none());

        assert_eq!(snapshot.set("health", Value::from(40)), Some(Value::Integer(100)));
        assert_eq!(snapshot.integer("health"), Some(40));
        assert_eq!(snapshot.len(), 2);

        snapshot.remove("stats");
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn serializes_as_plain_map() {
        let snapshot = StateSnapshot::from_fields([("gold", Value::from(5))]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"gold":5}"#);
    }
}
