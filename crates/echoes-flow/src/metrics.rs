//! Deployment metrics.
//!
//! Recorded through the `metrics` crate facade; without an installed
//! recorder every call is a no-op.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `echoes_component_transitions_total` | Counter | `kind`, `from_state`, `to_state` | Component state transitions |
//! | `echoes_apply_duration_seconds` | Histogram | `kind`, `phase`, `result` | Duration of one apply or destroy phase |
//! | `echoes_retries_total` | Counter | `kind`, `phase` | Retried provider calls |
//! | `echoes_rollbacks_total` | Counter | `result` | Rollback destroys by outcome |
//! | `echoes_runs_total` | Counter | `result` | Completed runs by outcome |

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

use crate::state::NodeState;

/// Metric names.
pub mod names {
    /// Counter: component state transitions.
    pub const COMPONENT_TRANSITIONS_TOTAL: &str = "echoes_component_transitions_total";
    /// Histogram: apply/destroy phase duration in seconds.
    pub const APPLY_DURATION_SECONDS: &str = "echoes_apply_duration_seconds";
    /// Counter: retried provider calls.
    pub const RETRIES_TOTAL: &str = "echoes_retries_total";
    /// Counter: rollback destroys.
    pub const ROLLBACKS_TOTAL: &str = "echoes_rollbacks_total";
    /// Counter: completed runs.
    pub const RUNS_TOTAL: &str = "echoes_runs_total";
}

/// Label keys.
pub mod labels {
    /// Component kind.
    pub const KIND: &str = "kind";
    /// Previous state.
    pub const FROM_STATE: &str = "from_state";
    /// Target state.
    pub const TO_STATE: &str = "to_state";
    /// Lifecycle phase (create, update, delete).
    pub const PHASE: &str = "phase";
    /// Outcome (success, failure).
    pub const RESULT: &str = "result";
}

/// Records orchestration metrics with consistent labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployMetrics;

impl DeployMetrics {
    /// Creates a metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a component state transition.
    pub fn record_transition(&self, kind: &str, from: NodeState, to: NodeState) {
        counter!(
            names::COMPONENT_TRANSITIONS_TOTAL,
            labels::KIND => kind.to_string(),
            labels::FROM_STATE => from.as_label(),
            labels::TO_STATE => to.as_label(),
        )
        .increment(1);
    }

    /// Records how long one lifecycle phase took.
    pub fn observe_phase_duration(
        &self,
        kind: &str,
        phase: &str,
        success: bool,
        duration: Duration,
    ) {
        histogram!(
            names::APPLY_DURATION_SECONDS,
            labels::KIND => kind.to_string(),
            labels::PHASE => phase.to_string(),
            labels::RESULT => result_label(success),
        )
        .record(duration.as_secs_f64());
    }

    /// Records retried attempts for one phase.
    pub fn record_retries(&self, kind: &str, phase: &str, retries: u32) {
        if retries == 0 {
            return;
        }
        counter!(
            names::RETRIES_TOTAL,
            labels::KIND => kind.to_string(),
            labels::PHASE => phase.to_string(),
        )
        .increment(u64::from(retries));
    }

    /// Records one rollback destroy.
    pub fn record_rollback(&self, success: bool) {
        counter!(names::ROLLBACKS_TOTAL, labels::RESULT => result_label(success)).increment(1);
    }

    /// Records a finished run.
    pub fn record_run(&self, success: bool) {
        counter!(names::RUNS_TOTAL, labels::RESULT => result_label(success)).increment(1);
    }
}

const fn result_label(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

/// Calls `on_drop` with the elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Starts timing.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
