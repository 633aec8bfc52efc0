//! Plugin system for the Sibyl framework.
//!
//! # Architecture
//!
//! A plugin is a named list of [`PluginItem`]s: commands, event hooks, idle
//! hooks, init hooks and unknown-command hooks. A [`PluginDescriptor`] is the
//! static, `Copy` handle to a plugin; the runtime calls
//! [`PluginDescriptor::instantiate`] and hands the items to the
//! [`PluginManager`](crate::manager::PluginManager).
//!
//! # Quick start
//!
//! ```rust,ignore
//! use sibyl::prelude::*;
//!
//! async fn roll(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> anyhow::Result<String> {
//!     let sides: u32 = args.first().map(|s| s.parse()).transpose()?.unwrap_or(6);
//!     Ok(format!("rolled {}", sides / 2))
//! }
//!
//! pub static DICE: PluginDescriptor = define_plugin! {
//!     name: "dice",
//!     items: [command("roll", roll)],
//! };
//! ```
//!
//! # Configuration
//!
//! The section `plugins.<name>` of the configuration is available to init
//! hooks through [`PluginInitContext::get_config`] and to handlers through
//! [`Bot::plugin_config`](crate::Bot::plugin_config).
//!
//! ```toml
//! [plugins.dice]
//! max_sides = 100
//! ```

// ─── Submodules ──────────────────────────────────────────────────────────────
pub mod builtin;
pub mod core;
pub mod descriptor;
pub mod macros;
pub mod state;

// ─── Re-exports from submodules ──────────────────────────────────────────────
pub use core::{
    CommandItem, DEFAULT_IDLE_INTERVAL, HookItem, IdleItem, InitFn, Plugin, PluginInitContext,
    PluginItem, PluginMetadata, command, hook, idle, init, on_unknown,
};
pub use descriptor::{PluginDescriptor, SIBYL_PLUGIN_API_VERSION};
pub use state::ExtensionStore;
