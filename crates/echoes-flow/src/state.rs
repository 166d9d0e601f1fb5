//! Component lifecycle state machine.
//!
//! ```text
//! ┌─────────┐ scheduled ┌───────────┐ inputs ok ┌──────────┐  success  ┌─────────┐
//! │ PENDING │──────────►│ RESOLVING │──────────►│ APPLYING │──────────►│ APPLIED │
//! └─────────┘           └───────────┘           └──────────┘           └─────────┘
//!      │                      │                      │                      │
//!  upstream               unresolved            error/timeout           rollback
//!   failed                  input                    │              ┌───────┴────────┐
//!      │                      │                      ▼              ▼                ▼
//!      ▼                      └───────────────►┌────────┐    ┌─────────────┐ ┌─────────────────┐
//! ┌─────────────┐                              │ FAILED │    │ ROLLED_BACK │ │ ROLLBACK_FAILED │
//! │ NOT_STARTED │                              └────────┘    └─────────────┘ └─────────────────┘
//! └─────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Lifecycle state of one component within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Registered, waiting for its dependencies.
    #[default]
    Pending,
    /// Dependencies applied, deferred inputs being resolved.
    Resolving,
    /// Apply action in flight.
    Applying,
    /// Apply succeeded and outputs are published.
    Applied,
    /// Input resolution, apply, or publication failed.
    Failed,
    /// Never started because the run failed first.
    NotStarted,
    /// Destroyed during rollback.
    RolledBack,
    /// Rollback destroy failed; the resource may still exist.
    RollbackFailed,
}

impl NodeState {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::NotStarted | Self::RolledBack | Self::RollbackFailed
        )
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Resolving | Self::NotStarted),
            Self::Resolving => matches!(target, Self::Applying | Self::Failed),
            Self::Applying => matches!(target, Self::Applied | Self::Failed),
            Self::Applied => matches!(target, Self::RolledBack | Self::RollbackFailed),
            Self::Failed | Self::NotStarted | Self::RolledBack | Self::RollbackFailed => false,
        }
    }

    /// Returns the lowercase label used for metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::NotStarted => "not_started",
            Self::RolledBack => "rolled_back",
            Self::RollbackFailed => "rollback_failed",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Resolving => write!(f, "RESOLVING"),
            Self::Applying => write!(f, "APPLYING"),
            Self::Applied => write!(f, "APPLIED"),
            Self::Failed => write!(f, "FAILED"),
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::RolledBack => write!(f, "ROLLED_BACK"),
            Self::RollbackFailed => write!(f, "ROLLBACK_FAILED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_valid() {
        assert!(NodeState::Pending.can_transition_to(NodeState::Resolving));
        assert!(NodeState::Resolving.can_transition_to(NodeState::Applying));
        assert!(NodeState::Applying.can_transition_to(NodeState::Applied));
        assert!(NodeState::Applied.can_transition_to(NodeState::RolledBack));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!NodeState::Pending.can_transition_to(NodeState::Applied));
        assert!(!NodeState::Pending.can_transition_to(NodeState::Applying));
        assert!(!NodeState::Applied.can_transition_to(NodeState::Failed));
        assert!(!NodeState::Failed.can_transition_to(NodeState::RolledBack));
    }

    #[test]
    fn terminal_states_allow_nothing() {
        for state in [
            NodeState::Failed,
            NodeState::NotStarted,
            NodeState::RolledBack,
            NodeState::RollbackFailed,
        ] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(NodeState::Pending));
        }
        assert!(!NodeState::Applied.is_terminal());
    }

    #[test]
    fn display_matches_serde() {
        let json = serde_json::to_string(&NodeState::NotStarted).unwrap();
        assert_eq!(json, format!("\"{}\"", NodeState::NotStarted));
    }
}
