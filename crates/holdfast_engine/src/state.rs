//! Observable orchestrator state.

/// Whether a reconciliation pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No pass is running.
    #[default]
    Idle,
    /// A pass is running.
    Syncing,
}

impl SyncState {
    /// Returns true if a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Passes that finished without error.
    pub passes_completed: u64,
    /// Passes that failed.
    pub passes_failed: u64,
    /// Writes committed to the remote store.
    pub writes_committed: u64,
    /// Remote attempts beyond the first.
    pub retries: u64,
    /// Last error message.
    pub last_error: Option<String>,
    /// Time of the last successful commit (millis since epoch).
    pub last_sync: Option<u64>,
}

/// A point-in-time view of one orchestrator, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current pass state.
    pub state: SyncState,
    /// Writes awaiting commit.
    pub pending: usize,
    /// Last known connectivity.
    pub online: bool,
    /// True if local persistence is failing.
    pub degraded: bool,
    /// True if sync stopped on an error that needs external repair.
    pub halted: bool,
    /// Last error message, cleared by a successful pass.
    pub last_error: Option<String>,
    /// Time of the last successful commit (millis since epoch).
    pub last_sync: Option<u64>,
}

/// Why a requested pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass was in flight; the request was coalesced into a
    /// follow-up pass.
    AlreadySyncing,
    /// The network is unreachable.
    Offline,
}

/// Result of a pass request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass ran to completion.
    Completed {
        /// Writes committed by the pass.
        committed: usize,
    },
    /// The pass did not run.
    Skipped(SkipReason),
}

impl PassOutcome {
    /// Returns the number of writes committed, zero if skipped.
    pub fn committed(&self) -> usize {
        match self {
            PassOutcome::Completed { committed } => *committed,
            PassOutcome::Skipped(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let status = SyncStatus::default();
        assert_eq!(status.state, SyncState::Idle);
        assert!(!status.state.is_active());
        assert!(SyncState::Syncing.is_active());
        assert_eq!(SyncStats::default().passes_completed, 0);
    }

    #[test]
    fn outcome_committed() {
        assert_eq!(PassOutcome::Completed { committed: 3 }.committed(), 3);
        assert_eq!(PassOutcome::Skipped(SkipReason::Offline).committed(), 0);
    }
}
