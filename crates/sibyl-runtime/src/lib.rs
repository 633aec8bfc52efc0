//! Sibyl Runtime - the main loop of the Sibyl chat-bot framework.
//!
//! This crate provides:
//! - Runtime orchestration (`SibylRuntime`)
//! - Protocol supervision: reconnect backoff, process timeouts, disabling
//!   protocols that failed authentication
//! - The deferred send queue for messages to unreachable destinations
//! - The idle scheduler with overrun tracking
//! - Layered configuration and logging
//! - Persistence of user-defined aliases and triggers
//!
//! ```ignore
//! use sibyl_runtime::SibylRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = SibylRuntime::new();
//!
//!     runtime.register_protocol::<CliProtocol>()?;
//!     runtime.register_plugin(DICE);
//!
//!     // Run until Ctrl+C or a `die` command
//!     runtime.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Loop Lifecycle
//!
//! - Protocols that fail to connect are retried after their backoff
//! - Authentication failures disable the protocol for good
//! - Once every protocol is disabled, the runtime stops with an error
//! - Messages for an unreachable protocol or room wait until it comes back

pub mod config;
pub mod error;
pub mod logging;
pub mod outbox;
pub mod rooms;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod supervisor;

// Re-exports
pub use config::{
    BotConfig, ConfigError, ConfigLoader, ConfigResult, OutboxConfig, ProtocolConfig,
    SchedulerConfig, SibylConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use outbox::{Offer, Outbox, OutboxLimits, Reachability};
pub use rooms::RoomTable;
pub use runtime::{RuntimeBuilder, SibylRuntime};
pub use scheduler::{IdleScheduler, SchedulerSettings, TickReport};
pub use store::{AliasStore, StoreError};
pub use supervisor::{ProtocolSlot, SlotEvent, SlotState};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
