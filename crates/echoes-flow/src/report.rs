//! Execution reports.
//!
//! An [`ExecutionReport`] is the structured result of one
//! [`Scheduler::run`](crate::scheduler::Scheduler::run): per-component
//! state and timing in topological order, every rollback attempt, the first
//! failure, and the resolved stack exports.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use echoes_core::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::change::ChangeKind;
use crate::component::{ComponentKind, ResourceHandle};
use crate::error::{Error, ErrorCode, Result};
use crate::policy::Phase;
use crate::state::NodeState;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    /// Every component applied.
    Succeeded,
    /// Something failed; applied components were rolled back.
    Failed,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A recorded error, detached from the live error value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    /// Stable classification.
    pub code: ErrorCode,
    /// Phase that was running, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Human-readable message with the full cause chain.
    pub message: String,
}

impl NodeError {
    /// Captures an error and its source chain.
    #[must_use]
    pub fn from_error(error: &Error, phase: Option<Phase>) -> Self {
        let mut message = error.to_string();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !message.contains(&cause_text) {
                let _ = write!(message, ": {cause_text}");
            }
            source = cause.source();
        }
        Self {
            code: error.code(),
            phase,
            message,
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// State and timing of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReport {
    /// Component name.
    pub component: String,
    /// Component kind.
    pub kind: ComponentKind,
    /// Final state.
    pub state: NodeState,
    /// What the change detector asked for, if the component started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeKind>,
    /// Last phase that ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Action invocations, retries included.
    pub attempts: u32,
    /// Live resource handle, if one was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ResourceHandle>,
    /// When resolution started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the component reached `Applied` or `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
}

impl ComponentReport {
    /// A pending entry.
    #[must_use]
    pub fn pending(component: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            component: component.into(),
            kind,
            state: NodeState::Pending,
            change: None,
            phase: None,
            attempts: 0,
            handle: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Moves to `to`, returning the previous state.
    pub(crate) fn transition(&mut self, to: NodeState) -> Result<NodeState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidStateTransition {
                component: self.component.clone(),
                from,
                to,
            });
        }
        self.state = to;
        Ok(from)
    }
}

/// Outcome of one rollback destroy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// The resource was destroyed.
    Destroyed,
    /// The destroy failed; the resource may still exist.
    Failed,
}

impl std::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Destroyed => write!(f, "destroyed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One rollback attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    /// Component whose resource was destroyed.
    pub component: String,
    /// The destroyed resource.
    pub handle: ResourceHandle,
    /// Result.
    pub outcome: RollbackOutcome,
    /// Destroy error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// When the destroy started.
    pub started_at: DateTime<Utc>,
    /// When the destroy finished.
    pub finished_at: DateTime<Utc>,
}

/// The first failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Failing component, or `None` for a stack-level failure (exports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// The error.
    pub error: NodeError,
}

/// Structured result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Run identifier.
    pub run_id: RunId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished, rollback included.
    pub completed_at: DateTime<Utc>,
    /// Overall result.
    pub outcome: RunOutcome,
    /// One entry per component, in topological order.
    pub components: Vec<ComponentReport>,
    /// Rollback attempts, in the order they ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback: Vec<RollbackEntry>,
    /// First failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    /// Resolved stack exports; sensitive values are never included.
    #[serde(default)]
    pub exports: BTreeMap<String, Value>,
}

impl ExecutionReport {
    /// Returns the entry for a component.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentReport> {
        self.components.iter().find(|c| c.component == name)
    }

    /// Returns the final state of a component.
    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<NodeState> {
        self.component(name).map(|c| c.state)
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Components in a given state, in report order.
    pub fn in_state(&self, state: NodeState) -> impl Iterator<Item = &str> {
        self.components
            .iter()
            .filter(move |c| c.state == state)
            .map(|c| c.component.as_str())
    }

    /// A human-readable summary naming the first failure and every rollback
    /// outcome.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        match (&self.outcome, &self.failure) {
            (RunOutcome::Succeeded, _) => {
                let _ = write!(
                    out,
                    "run {} SUCCEEDED: {} component(s) applied",
                    self.run_id,
                    self.in_state(NodeState::Applied).count()
                );
            }
            (RunOutcome::Failed, Some(failure)) => {
                let phase = failure
                    .error
                    .phase
                    .map(|p| format!(" during {p}"))
                    .unwrap_or_default();
                match &failure.component {
                    Some(component) => {
                        let _ = write!(
                            out,
                            "run {} FAILED: component '{component}' failed{phase}: {}",
                            self.run_id, failure.error
                        );
                    }
                    None => {
                        let _ = write!(out, "run {} FAILED: {}", self.run_id, failure.error);
                    }
                }
            }
            (RunOutcome::Failed, None) => {
                let _ = write!(out, "run {} FAILED", self.run_id);
            }
        }

        let not_started: Vec<&str> = self.in_state(NodeState::NotStarted).collect();
        if !not_started.is_empty() {
            let _ = write!(out, "\nnot started: {}", not_started.join(", "));
        }

        if !self.rollback.is_empty() {
            out.push_str("\nrollback:");
            for entry in &self.rollback {
                let _ = write!(out, "\n  {}: {}", entry.component, entry.outcome);
                if let Some(error) = &entry.error {
                    let _ = write!(out, " ({error})");
                }
            }
        }
        out
    }
}
