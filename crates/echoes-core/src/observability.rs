//! Observability infrastructure.
//!
//! Structured logging with consistent spans, plus a wrapper that keeps
//! secret material out of logs and debug output.

use std::fmt;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{
    EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for CI and log shipping).
    Json,
    /// Pretty-printed logs (for terminals).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops. Logs go to stderr so stdout stays
/// machine-readable.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `echoes_flow=debug`)
///
/// # Example
///
/// ```rust
/// use echoes_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_fmt::layer()
                            .with_target(false)
                            .with_writer(std::io::stderr),
                    )
                    .init();
            }
        }
    });
}

/// Creates a span covering one orchestration run.
///
/// # Example
///
/// ```rust
/// use echoes_core::observability::run_span;
///
/// let span = run_span("apply", "01HZY3V8W3M4N5P6Q7R8S9T0AB");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn run_span(operation: &str, run_id: &str) -> Span {
    tracing::info_span!("run", op = operation, run_id = run_id)
}

/// Creates a span for work done on behalf of one component.
#[must_use]
pub fn component_span(component: &str, kind: &str, phase: &str) -> Span {
    tracing::info_span!("component", component = component, kind = kind, phase = phase)
}

/// Wraps a value that must never appear in logs or debug output.
///
/// `Debug` and `Display` both print `[REDACTED]`; the inner value is only
/// reachable through [`Redacted::expose`].
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Wraps a secret value.
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Returns a reference to the secret value.
    pub const fn expose(&self) -> &T {
        &self.0
    }

    /// Consumes the wrapper and returns the secret value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Redacted<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = run_span("apply", "run_123");
        let _guard = span.enter();
        let inner = component_span("main-network", "network", "create");
        let _inner_guard = inner.enter();
        tracing::info!("inside component span");
    }

    #[test]
    fn redacted_hides_value_in_debug_and_display() {
        let secret = Redacted::new("s3cr3t".to_string());
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "s3cr3t");
    }

    #[test]
    fn redacted_inside_struct_debug() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Credentials {
            client_id: String,
            client_secret: Redacted<String>,
        }

        let creds = Credentials {
            client_id: "id".into(),
            client_secret: "secret".to_string().into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("\"secret\""));
    }
}
