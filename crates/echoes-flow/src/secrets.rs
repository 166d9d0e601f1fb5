//! Secret lookup.
//!
//! Secrets (database passwords, OAuth client credentials) are read at apply
//! time and never stored in the graph. Values travel wrapped in
//! [`Redacted`] so they cannot leak through `Debug` or log fields.

use std::collections::HashMap;

use echoes_core::Redacted;

use crate::error::{Error, Result};

/// A source of named secrets.
pub trait SecretSource: Send + Sync {
    /// Returns the secret, or `None` if it is not available.
    fn secret(&self, name: &str) -> Option<Redacted<String>>;
}

/// Reads secrets from process environment variables.
///
/// An empty variable counts as missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, name: &str) -> Option<Redacted<String>> {
        std::env::var(name)
            .ok()
            .filter(|value| !value.is_empty())
            .map(Redacted::new)
    }
}

/// A fixed in-memory secret table, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, Redacted<String>>,
}

impl StaticSecrets {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), Redacted::new(value.into()));
        self
    }
}

impl SecretSource for StaticSecrets {
    fn secret(&self, name: &str) -> Option<Redacted<String>> {
        self.values.get(name).cloned()
    }
}

/// Looks up a secret that `component` cannot run without.
///
/// # Errors
///
/// Returns [`Error::MissingSecret`] if the source does not have it.
pub fn require_secret(
    source: &dyn SecretSource,
    component: &str,
    name: &str,
) -> Result<Redacted<String>> {
    source.secret(name).ok_or_else(|| Error::MissingSecret {
        component: component.to_string(),
        secret: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_secrets_lookup() {
        let secrets = StaticSecrets::new().with("POSTGRES_PASSWORD", "hunter2");
        let value = require_secret(&secrets, "postgres", "POSTGRES_PASSWORD").unwrap();
        assert_eq!(value.expose(), "hunter2");
        assert_eq!(format!("{value:?}"), "[REDACTED]");
    }

    #[test]
    fn missing_secret_names_component_and_secret() {
        let err = require_secret(
            &StaticSecrets::new(),
            "app-addons",
            "APP_TAILSCALE_OAUTH_CLIENT_ID",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingSecret { ref component, ref secret }
                if component == "app-addons" && secret == "APP_TAILSCALE_OAUTH_CLIENT_ID"
        ));
    }

    #[test]
    fn env_secrets_reads_process_environment() {
        assert!(EnvSecrets.secret("ECHOES_TEST_SECRET_THAT_IS_NEVER_SET").is_none());
        let path = EnvSecrets.secret("PATH");
        assert_eq!(
            path.map(Redacted::into_inner),
            std::env::var("PATH").ok().filter(|v| !v.is_empty())
        );
    }
}
