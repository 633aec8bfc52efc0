//! # Sibyl
//!
//! A pluggable chat-bot framework that talks to several messaging back ends
//! at once through a single command system.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ events ┌───────────┐      ┌────────────┐      ┌──────────────┐
//! │  Protocol  │───────▶│ Main loop │─────▶│ Dispatcher │─────▶│ Plugin       │
//! │ (adapters) │◀───────│ (runtime) │      │            │      │ commands     │
//! └────────────┘  send  └───────────┘      └────────────┘      └──────────────┘
//!                        │ outbox │ idle scheduler │ alias store │
//! ```
//!
//! - **Protocols**: adapters that turn a back end into normalized messages
//! - **Runtime**: one cooperative loop supervising every adapter
//! - **Dispatcher**: prefix handling, alias expansion, permission rules
//! - **Plugins**: commands, hooks and idle tasks declared with [`define_plugin!`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sibyl::prelude::*;
//!
//! async fn roll(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
//!     format!("You rolled {}", args.join(" "))
//! }
//!
//! static DICE: PluginDescriptor = define_plugin! {
//!     /// Dice rolling.
//!     name: "dice",
//!     items: [command("roll", roll)],
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = SibylRuntime::new();
//!     runtime.register_protocol::<CliProtocol>()?;
//!     runtime.register_plugin(DICE);
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `cli`: Bundle the terminal adapter (default)
//! - `toml-config` / `yaml-config`: Configuration file formats
//! - `json-log`: JSON log output

pub use sibyl_core as core;
pub use sibyl_framework as framework;
pub use sibyl_runtime as runtime;

#[cfg(feature = "cli")]
pub use sibyl_adapter_cli as cli;

pub use sibyl_framework::define_plugin;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use sibyl::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use sibyl_runtime::{RuntimeBuilder, SibylRuntime};

    // Plugin authoring
    pub use sibyl_framework::prelude::*;

    // Adapter authoring
    pub use sibyl_core::{
        BoxedProtocol, ConfigurableProtocol, Protocol, ProtocolContext, ProtocolError,
        ProtocolResult, UserKind,
    };

    #[cfg(feature = "cli")]
    pub use sibyl_adapter_cli::{CliConfig, CliProtocol};
}
