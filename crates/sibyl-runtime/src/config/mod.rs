//! Configuration module for the Sibyl runtime.
//!
//! Layered loading through figment (defaults, files, `SIBYL_*` environment
//! variables, programmatic overrides) followed by validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    BotConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, OutboxConfig,
    PermissionsConfig, ProtocolConfig, RoomConfig, SchedulerConfig, SibylConfig, SpanEventConfig,
    StateConfig,
};
pub use validation::validate_config;
