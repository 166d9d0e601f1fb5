//! Per-component timeout, deletion and retry policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default limit for every lifecycle phase (10 minutes).
const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// A lifecycle phase of a component action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// First creation of a resource.
    Create,
    /// In-place update of an existing resource.
    Update,
    /// Destruction (rollback or replacement).
    Delete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Deadlines for each lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Limit for creating the resource.
    #[serde(with = "humantime_serde")]
    pub create: Duration,
    /// Limit for updating the resource in place.
    #[serde(with = "humantime_serde")]
    pub update: Duration,
    /// Limit for destroying the resource.
    #[serde(with = "humantime_serde")]
    pub delete: Duration,
}

impl Timeouts {
    /// Uses the same limit for every phase.
    #[must_use]
    pub const fn uniform(limit: Duration) -> Self {
        Self {
            create: limit,
            update: limit,
            delete: limit,
        }
    }

    /// Uses the same limit, in minutes, for every phase.
    #[must_use]
    pub const fn minutes(minutes: u64) -> Self {
        Self::uniform(Duration::from_secs(minutes * 60))
    }

    /// Returns the limit for a phase.
    #[must_use]
    pub const fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Create => self.create,
            Phase::Update => self.update,
            Phase::Delete => self.delete,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_PHASE_TIMEOUT)
    }
}

/// How a component is replaced when its desired spec changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeletionPolicy {
    /// Destroy the old resource before creating its replacement.
    ///
    /// Needed when the replacement claims the same unique name (two GKE
    /// clusters cannot share a name).
    #[serde(default)]
    pub delete_before_replace: bool,
}

/// Bounded retry with exponential backoff for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Default backoff with a custom attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Returns the attempt budget, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns the un-jittered delay that follows `attempt` (1-based).
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_select_phase_limit() {
        let timeouts = Timeouts {
            create: Duration::from_secs(1),
            update: Duration::from_secs(2),
            delete: Duration::from_secs(3),
        };
        assert_eq!(timeouts.for_phase(Phase::Create), Duration::from_secs(1));
        assert_eq!(timeouts.for_phase(Phase::Update), Duration::from_secs(2));
        assert_eq!(timeouts.for_phase(Phase::Delete), Duration::from_secs(3));
    }

    #[test]
    fn timeouts_parse_humantime_strings() {
        let timeouts: Timeouts =
            serde_json::from_str(r#"{"create":"45m","update":"45m","delete":"30m"}"#).unwrap();
        assert_eq!(timeouts.create, Duration::from_secs(45 * 60));
        assert_eq!(timeouts.delete, Duration::from_secs(30 * 60));
        assert_eq!(Timeouts::minutes(45).update, Duration::from_secs(2700));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_after(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_after(4), Duration::from_secs(5));
        assert_eq!(policy.backoff_after(40), Duration::from_secs(5));
    }

    #[test]
    fn none_policy_makes_one_attempt() {
        assert_eq!(RetryPolicy::none().attempts(), 1);
        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(zero.attempts(), 1);
    }

    #[test]
    fn deletion_policy_defaults_to_create_before_delete() {
        assert!(!DeletionPolicy::default().delete_before_replace);
    }
}
