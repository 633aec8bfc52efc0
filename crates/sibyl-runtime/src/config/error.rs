//! Configuration error types.

use std::path::PathBuf;

use sibyl_framework::RuleParseError;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found at the specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// A source could not be parsed or extracted into the schema.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {message}")]
    ValidationError { message: String },

    /// Missing required field.
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// A permission rule is malformed.
    #[error(transparent)]
    InvalidRule(#[from] RuleParseError),

    /// A `[protocols.<name>]` section could not be turned into adapter settings.
    #[error("Invalid settings for protocol '{protocol}': {reason}")]
    InvalidProtocolSettings { protocol: String, reason: String },
}

impl ConfigError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn protocol_settings(protocol: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidProtocolSettings {
            protocol: protocol.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
