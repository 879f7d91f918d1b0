//! Errors raised while loading or validating worker settings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required layer such as `default.toml` is missing.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// The merged sources do not deserialize into [`Settings`](crate::config::Settings).
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Both single-file and layered loading were requested through the environment.
    #[error("Conflicting configuration sources: {0}")]
    ConflictingSources(String),

    /// A scalar setting is out of range or malformed.
    #[error("Invalid value for {field}: {message}")]
    ValidationError { field: String, message: String },

    /// A coordination key namespace cannot be used as a store prefix.
    #[error("Invalid key prefix '{prefix}' for {field}: {reason}")]
    InvalidPrefix {
        field: String,
        prefix: String,
        reason: String,
    },

    /// The etcd backend was selected without any endpoint to dial.
    #[error("coordination.endpoints must list at least one etcd endpoint for the etcd backend")]
    MissingEndpoints,

    /// A `[[tasks]]` seed cannot be written to the task namespace.
    #[error("Invalid seeded task '{name}': {reason}")]
    InvalidTask { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Source(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        ConfigError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_prefix(field: &str, prefix: &str, reason: &str) -> Self {
        ConfigError::InvalidPrefix {
            field: field.to_string(),
            prefix: prefix.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_task<S: Into<String>>(name: &str, reason: S) -> Self {
        ConfigError::InvalidTask {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Dotted path of the offending setting, when the error concerns one.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::ValidationError { field, .. } | ConfigError::InvalidPrefix { field, .. } => {
                Some(field)
            }
            ConfigError::MissingEndpoints => Some("coordination.endpoints"),
            ConfigError::InvalidTask { .. } => Some("tasks"),
            _ => None,
        }
    }
}
