//! # Sibyl Adapter for the Terminal
//!
//! Connects the Sibyl bot to the local console: every line typed on stdin
//! becomes a private message from the configured user, and replies are
//! printed to stdout.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sibyl_runtime::SibylRuntime;
//! use sibyl_adapter_cli::CliProtocol;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = SibylRuntime::new();
//!     runtime.register_protocol::<CliProtocol>()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The console is usually trusted, so it is commonly declared an admin
//! protocol (`admin = true` in `[protocols.cli]`), which skips permission
//! rules for it.

mod adapter;
pub mod config;

pub use adapter::CliProtocol;
pub use config::CliConfig;
