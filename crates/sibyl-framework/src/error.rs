//! Error types for the Sibyl framework.

use thiserror::Error;

/// Errors raised by the command registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Command names are alphanumeric plus underscore.
    #[error("invalid command name '{0}': only letters, digits and '_' are allowed")]
    InvalidName(String),

    /// The name is already taken, case-insensitively.
    #[error("command '{name}' is already defined by '{owner}'")]
    DuplicateName {
        /// The contested name.
        name: String,
        /// Namespace that owns the existing registration.
        owner: String,
    },

    #[error("command '{0}' is not registered")]
    NotFound(String),

    /// The plugin layer no longer accepts changes once startup has finished.
    #[error("command '{0}' belongs to the sealed plugin layer")]
    Sealed(String),
}

/// A permission rule that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid permission rule '{rule}': {reason}")]
pub struct RuleParseError {
    /// The offending rule text.
    pub rule: String,
    /// What is wrong with it.
    pub reason: String,
}

impl RuleParseError {
    pub fn new(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the extension-state store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("state key '{key}' is already declared by '{owner}'")]
    Collision { key: String, owner: String },
}

/// Fatal conditions detected while loading plugins.
///
/// Any of these aborts startup: two plugins silently shadowing each other is
/// never acceptable.
#[derive(Debug, Clone, Error)]
pub enum StartupError {
    #[error("plugin '{0}' is registered twice")]
    DuplicatePlugin(String),

    #[error("plugin '{name}' targets API {found:#x}, host provides {expected:#x}")]
    IncompatiblePlugin {
        name: String,
        found: u32,
        expected: u32,
    },

    #[error("plugin '{plugin}' cannot register command: {source}")]
    Command {
        plugin: String,
        #[source]
        source: RegistryError,
    },

    #[error("plugin '{plugin}' cannot declare state: {source}")]
    State {
        plugin: String,
        #[source]
        source: StateError,
    },
}

/// The bot's hand-off queues are closed; the main loop has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the bot is shutting down")]
pub struct BotClosed;

/// A handler or hook panicked; the panic was caught at its call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("panicked: {0}")]
pub struct HandlerPanic(pub String);
