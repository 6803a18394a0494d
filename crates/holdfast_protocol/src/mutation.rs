//! Mutation kinds, merge strategies, and sync priorities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sync priority of a pending write.
///
/// The derived ordering is queue order: `High < Medium < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Safety-relevant state, synced as soon as connectivity allows.
    High,
    /// Resource counters and inventory, synced in debounced batches.
    Medium,
    /// Everything else.
    Low,
}

impl Priority {
    /// All priorities in queue order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Returns true for the priority that bypasses debouncing.
    pub fn is_critical(self) -> bool {
        self == Priority::High
    }

    /// Returns the lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a mutation's payload is combined with the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Replace the named top-level field(s) wholesale.
    Overwrite {
        /// Field written when the payload is not a map.
        field: &'static str,
    },
    /// Recursively merge nested maps; payload leaves win.
    DeepMerge {
        /// Field written when the payload is not a map.
        field: &'static str,
    },
    /// Add the payload's integer to the field.
    Accumulate {
        /// Counter field.
        field: &'static str,
    },
    /// Overwrite top-level keys of a map payload.
    Shallow,
}

/// The closed set of mutation kinds collaborators can request.
///
/// Every kind carries an explicit merge strategy and sync priority.
/// Unknown wire tags are preserved as [`MutationKind::Custom`] and merged
/// with the shallow default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MutationKind {
    /// Current hit points.
    UpdateHealth,
    /// Where the character is.
    UpdateLocation,
    /// Coma / incapacitation status.
    UpdateComaStatus,
    /// Item counts and equipment.
    UpdateInventory,
    /// Attribute blocks.
    UpdateStats,
    /// Skill training progress.
    UpdateTraining,
    /// Workshop task progress.
    UpdateTaskProgress,
    /// Action point delta.
    UpdateActionPoints,
    /// Movement point delta.
    UpdateMovementPoints,
    /// Currency delta.
    UpdateCurrency,
    /// Any other tag.
    Custom(String),
}

impl MutationKind {
    /// Parses a wire tag; unknown tags become [`MutationKind::Custom`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "UPDATE_HEALTH" => Self::UpdateHealth,
            "UPDATE_LOCATION" => Self::UpdateLocation,
            "UPDATE_COMA_STATUS" => Self::UpdateComaStatus,
            "UPDATE_INVENTORY" => Self::UpdateInventory,
            "UPDATE_STATS" => Self::UpdateStats,
            "UPDATE_TRAINING" => Self::UpdateTraining,
            "UPDATE_TASK_PROGRESS" => Self::UpdateTaskProgress,
            "UPDATE_ACTION_POINTS" => Self::UpdateActionPoints,
            "UPDATE_MOVEMENT_POINTS" => Self::UpdateMovementPoints,
            "UPDATE_CURRENCY" => Self::UpdateCurrency,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Returns the wire tag.
    pub fn tag(&self) -> &str {
        match self {
            Self::UpdateHealth => "UPDATE_HEALTH",
            Self::UpdateLocation => "UPDATE_LOCATION",
            Self::UpdateComaStatus => "UPDATE_COMA_STATUS",
            Self::UpdateInventory => "UPDATE_INVENTORY",
            Self::UpdateStats => "UPDATE_STATS",
            Self::UpdateTraining => "UPDATE_TRAINING",
            Self::UpdateTaskProgress => "UPDATE_TASK_PROGRESS",
            Self::UpdateActionPoints => "UPDATE_ACTION_POINTS",
            Self::UpdateMovementPoints => "UPDATE_MOVEMENT_POINTS",
            Self::UpdateCurrency => "UPDATE_CURRENCY",
            Self::Custom(tag) => tag,
        }
    }

    /// Returns the merge strategy for this kind.
    pub fn strategy(&self) -> MergeStrategy {
        match self {
            Self::UpdateHealth => MergeStrategy::Overwrite { field: "health" },
            Self::UpdateLocation => MergeStrategy::Overwrite { field: "location" },
            Self::UpdateComaStatus => MergeStrategy::Overwrite {
                field: "incapacitated",
            },
            Self::UpdateInventory => MergeStrategy::DeepMerge { field: "inventory" },
            Self::UpdateStats => MergeStrategy::DeepMerge { field: "stats" },
            Self::UpdateTraining => MergeStrategy::DeepMerge { field: "training" },
            Self::UpdateTaskProgress => MergeStrategy::DeepMerge { field: "tasks" },
            Self::UpdateActionPoints => MergeStrategy::Accumulate {
                field: "action_points",
            },
            Self::UpdateMovementPoints => MergeStrategy::Accumulate {
                field: "movement_points",
            },
            Self::UpdateCurrency => MergeStrategy::Accumulate { field: "currency" },
            Self::Custom(_) => MergeStrategy::Shallow,
        }
    }

    /// Returns the sync priority for this kind.
    pub fn priority(&self) -> Priority {
        match self {
            Self::UpdateHealth | Self::UpdateComaStatus | Self::UpdateLocation => Priority::High,
            Self::UpdateActionPoints
            | Self::UpdateMovementPoints
            | Self::UpdateInventory
            | Self::UpdateCurrency => Priority::Medium,
            Self::UpdateStats
            | Self::UpdateTraining
            | Self::UpdateTaskProgress
            | Self::Custom(_) => Priority::Low,
        }
    }
}

impl From<String> for MutationKind {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<&str> for MutationKind {
    fn from(tag: &str) -> Self {
        Self::from_tag(tag)
    }
}

impl From<MutationKind> for String {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Custom(tag) => tag,
            other => other.tag().to_string(),
        }
    }
}

impl FromStr for MutationKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_tag(s))
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_queue_order() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert!(Priority::High.is_critical());
        assert!(!Priority::Low.is_critical());
    }

    #[test]
    fn safety_kinds_are_high_priority() {
        assert_eq!(MutationKind::UpdateHealth.priority(), Priority::High);
        assert_eq!(MutationKind::UpdateComaStatus.priority(), Priority::High);
        assert_eq!(MutationKind::UpdateLocation.priority(), Priority::High);
    }

    #[test]
    fn resource_kinds_are_medium_priority() {
        assert_eq!(MutationKind::UpdateActionPoints.priority(), Priority::Medium);
        assert_eq!(MutationKind::UpdateMovementPoints.priority(), Priority::Medium);
        assert_eq!(MutationKind::UpdateInventory.priority(), Priority::Medium);
        assert_eq!(MutationKind::UpdateCurrency.priority(), Priority::Medium);
    }

    #[test]
    fn remaining_kinds_are_low_priority() {
        assert_eq!(MutationKind::UpdateStats.priority(), Priority::Low);
        assert_eq!(MutationKind::UpdateTaskProgress.priority(), Priority::Low);
        assert_eq!(MutationKind::from_tag("SET_TITLE").priority(), Priority::Low);
    }

    #[test]
    fn tags_round_trip() {
        for tag in [
            "UPDATE_HEALTH",
            "UPDATE_LOCATION",
            "UPDATE_COMA_STATUS",
            "UPDATE_INVENTORY",
            "UPDATE_STATS",
            "UPDATE_TRAINING",
            "UPDATE_TASK_PROGRESS",
            "UPDATE_ACTION_POINTS",
            "UPDATE_MOVEMENT_POINTS",
            "UPDATE_CURRENCY",
            "SET_TITLE",
        ] {
            assert_eq!(MutationKind::from_tag(tag).tag(), tag);
        }
        assert_eq!(
            MutationKind::from_tag("SET_TITLE"),
            MutationKind::Custom("SET_TITLE".into())
        );
    }

    #[test]
    fn serializes_as_tag() {
        let json = serde_json::to_string(&MutationKind::UpdateHealth).unwrap();
        assert_eq!(json, "\"UPDATE_HEALTH\"");

        let kind: MutationKind = serde_json::from_str("\"UPDATE_INVENTORY\"").unwrap();
        assert_eq!(kind, MutationKind::UpdateInventory);
    }

    #[test]
    fn strategies() {
        assert_eq!(
            MutationKind::UpdateHealth.strategy(),
            MergeStrategy::Overwrite { field: "health" }
        );
        assert!(matches!(
            MutationKind::UpdateInventory.strategy(),
            MergeStrategy::DeepMerge { .. }
        ));
        assert!(matches!(
            MutationKind::UpdateActionPoints.strategy(),
            MergeStrategy::Accumulate { .. }
        ));
        assert_eq!(
            MutationKind::Custom("X".into()).strategy(),
            MergeStrategy::Shallow
        );
    }
}
