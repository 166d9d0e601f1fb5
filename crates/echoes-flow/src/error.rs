//! Error types for the orchestration domain.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::Phase;
use crate::provider::ProviderError;
use crate::state::NodeState;

/// The result type used throughout echoes-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or running a deployment graph.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A component with the same name is already registered.
    #[error("duplicate component name: {name}")]
    DuplicateName {
        /// The conflicting component name.
        name: String,
    },

    /// A dependency or input referenced a component that is not registered.
    #[error("unknown component: {name}")]
    UnknownComponent {
        /// The name that could not be resolved.
        name: String,
    },

    /// A cycle was detected in the dependency graph.
    #[error("cycle detected in dependency graph: {}", cycle.join(" -> "))]
    CycleDetected {
        /// The cycle path; the first component is repeated at the end.
        cycle: Vec<String>,
    },

    /// A deferred input was read before its producer published it.
    #[error("unresolved input: output '{key}' of component '{component}' has not been published")]
    UnresolvedInput {
        /// The producing component.
        component: String,
        /// The output key that was referenced.
        key: String,
    },

    /// An output was published twice.
    #[error("duplicate output: '{component}.{key}' is already published")]
    DuplicateOutput {
        /// The producing component.
        component: String,
        /// The output key.
        key: String,
    },

    /// An output lookup found nothing.
    #[error("output not found: '{component}.{key}'")]
    OutputNotFound {
        /// The producing component.
        component: String,
        /// The output key.
        key: String,
    },

    /// An action exceeded its configured deadline.
    #[error(
        "component '{component}' timed out during {phase} after {}",
        humantime::format_duration(*limit)
    )]
    Timeout {
        /// The component whose action timed out.
        component: String,
        /// The lifecycle phase that was running.
        phase: Phase,
        /// The configured limit.
        limit: Duration,
    },

    /// A secret required by a component is not available.
    #[error("component '{component}' is missing required secret '{secret}'")]
    MissingSecret {
        /// The component that needed the secret.
        component: String,
        /// The secret name.
        secret: String,
    },

    /// The external resource provider reported a failure.
    #[error("provider error for component '{component}': {source}")]
    Provider {
        /// The component being created or destroyed.
        component: String,
        /// The provider's error.
        #[source]
        source: ProviderError,
    },

    /// An invalid component state transition was attempted.
    #[error("invalid state transition for '{component}': {from} -> {to}")]
    InvalidStateTransition {
        /// The component whose state was changing.
        component: String,
        /// The current state.
        from: NodeState,
        /// The attempted target state.
        to: NodeState,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An error from echoes-core.
    #[error("core error: {0}")]
    Core(#[from] echoes_core::Error),
}

/// Stable, serializable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// See [`Error::DuplicateName`].
    DuplicateName,
    /// See [`Error::UnknownComponent`].
    UnknownComponent,
    /// See [`Error::CycleDetected`].
    CycleDetected,
    /// See [`Error::UnresolvedInput`].
    UnresolvedInput,
    /// See [`Error::DuplicateOutput`].
    DuplicateOutput,
    /// See [`Error::OutputNotFound`].
    OutputNotFound,
    /// See [`Error::Timeout`].
    Timeout,
    /// See [`Error::MissingSecret`].
    MissingSecret,
    /// See [`Error::Provider`].
    Provider,
    /// See [`Error::InvalidStateTransition`].
    InvalidStateTransition,
    /// See [`Error::InvalidInput`].
    InvalidInput,
    /// See [`Error::Core`].
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DuplicateName => "duplicate_name",
            Self::UnknownComponent => "unknown_component",
            Self::CycleDetected => "cycle_detected",
            Self::UnresolvedInput => "unresolved_input",
            Self::DuplicateOutput => "duplicate_output",
            Self::OutputNotFound => "output_not_found",
            Self::Timeout => "timeout",
            Self::MissingSecret => "missing_secret",
            Self::Provider => "provider",
            Self::InvalidStateTransition => "invalid_state_transition",
            Self::InvalidInput => "invalid_input",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Creates a provider error attributed to a component.
    #[must_use]
    pub fn provider(component: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            component: component.into(),
            source,
        }
    }

    /// Returns the stable classification of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateName { .. } => ErrorCode::DuplicateName,
            Self::UnknownComponent { .. } => ErrorCode::UnknownComponent,
            Self::CycleDetected { .. } => ErrorCode::CycleDetected,
            Self::UnresolvedInput { .. } => ErrorCode::UnresolvedInput,
            Self::DuplicateOutput { .. } => ErrorCode::DuplicateOutput,
            Self::OutputNotFound { .. } => ErrorCode::OutputNotFound,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::MissingSecret { .. } => ErrorCode::MissingSecret,
            Self::Provider { .. } => ErrorCode::Provider,
            Self::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Core(_) => ErrorCode::Internal,
        }
    }

    /// Returns true if retrying the same action may succeed.
    ///
    /// Only provider errors flagged as transient qualify; wiring bugs,
    /// missing secrets and timeouts never do.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for errors that can only be raised while building the graph.
    #[must_use]
    pub const fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. } | Self::UnknownComponent { .. } | Self::CycleDetected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn cycle_error_names_the_path() {
        let err = Error::CycleDetected {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "cycle detected in dependency graph: a -> b -> a"
        );
        assert!(err.is_graph_error());
    }

    #[test]
    fn timeout_error_formats_limit() {
        let err = Error::Timeout {
            component: "app-cluster".into(),
            phase: Phase::Create,
            limit: Duration::from_secs(45 * 60),
        };
        let msg = err.to_string();
        assert!(msg.contains("app-cluster"));
        assert!(msg.contains("create"));
        assert!(msg.contains("45m"));
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(!err.is_retryable());
    }

    #[test]
    fn provider_error_keeps_source_and_retry_flag() {
        let err = Error::provider("main-network", ProviderError::transient("quota exceeded"));
        assert!(err.is_retryable());
        assert_eq!(err.code(), ErrorCode::Provider);
        assert!(StdError::source(&err).is_some());
        assert!(err.to_string().contains("quota exceeded"));

        let fatal = Error::provider("main-network", ProviderError::new("permission denied"));
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn state_transition_error_display() {
        let err = Error::InvalidStateTransition {
            component: "app".into(),
            from: NodeState::Pending,
            to: NodeState::Applied,
        };
        let msg = err.to_string();
        assert!(msg.contains("PENDING"));
        assert!(msg.contains("APPLIED"));
    }

    #[test]
    fn error_code_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::MissingSecret).unwrap();
        assert_eq!(json, "\"missing_secret\"");
        assert_eq!(ErrorCode::UnresolvedInput.to_string(), "unresolved_input");
    }
}
