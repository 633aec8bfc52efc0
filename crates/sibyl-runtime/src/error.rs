//! Runtime error types.

use sibyl_core::ProtocolError;
use sibyl_framework::{RuleParseError, StartupError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Errors that stop the runtime from starting or keep it from running.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A plugin could not be loaded.
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Rules(#[from] RuleParseError),

    /// Two protocol instances share a name.
    #[error("Protocol already registered: {0}")]
    DuplicateProtocol(String),

    /// An adapter could not be created from its configuration.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every configured protocol failed permanently.
    #[error("All protocols are disabled")]
    AllProtocolsDisabled,

    /// The main loop panicked.
    #[error("Main loop panicked: {0}")]
    Panic(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
