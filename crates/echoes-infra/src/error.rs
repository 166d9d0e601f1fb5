//! Error types for loading settings and building stacks.

use std::path::PathBuf;

/// The result type used throughout echoes-infra.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or wiring stacks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The settings file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The file that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings document is not valid YAML or does not match the schema.
    #[error("malformed settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A setting is present but has an invalid value.
    #[error("invalid setting '{field}': {message}")]
    Config {
        /// Dotted path of the offending key.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Graph construction failed.
    #[error(transparent)]
    Flow(#[from] echoes_flow::error::Error),
}

impl Error {
    /// Creates a configuration error for `field`.
    #[must_use]
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_field() {
        let err = Error::config("app_cluster.zone", "must not be empty");
        assert_eq!(
            err.to_string(),
            "invalid setting 'app_cluster.zone': must not be empty"
        );
    }
}
