//! # Sibyl Framework
//!
//! Command handling on top of [`sibyl_core`].
//!
//! This layer provides:
//! - The layered [`CommandRegistry`]: plugin commands, then user aliases and
//!   triggers on top
//! - The [`RuleSet`] permission engine (last matching rule wins)
//! - Handlers as tower services with panic containment
//! - Plugins declared with [`define_plugin!`] and loaded by the
//!   [`PluginManager`]
//! - The [`Dispatcher`], turning inbound messages into command invocations
//!
//! The framework never talks to a protocol itself. Replies and control
//! requests leave through the [`Bot`] handle's hand-off queues, which the
//! runtime drains.

pub mod bot;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod hook;
pub mod manager;
pub mod permission;
pub mod plugin;

pub use bot::{Bot, BotBuilder, BotChannels, CommandInfo, ControlRequest};
pub use command::{CommandEntry, CommandRegistry, CommandTarget, Overlay, tokenize};
pub use dispatcher::{DispatchSettings, DispatchStats, Dispatched, Dispatcher};
pub use error::{BotClosed, HandlerPanic, RegistryError, RuleParseError, StartupError, StateError};
pub use handler::{CommandHandler, CommandRequest, IntoReply, into_handler};
pub use hook::{HookEvent, HookKind, HookRegistry, IdleHook};
pub use manager::{PluginLoadState, PluginManager};
pub use permission::{Decision, Rule, RuleSet, Verdict};
pub use plugin::{Plugin, PluginDescriptor, PluginInitContext, PluginItem};

pub use sibyl_core::Message;

/// Prelude for plugin authors.
pub mod prelude {
    pub use std::sync::Arc;
    pub use std::time::Duration;

    pub use sibyl_core::{Message, MessageKind, Outgoing, Room, RoomFilter, Target, User};

    pub use crate::bot::{Bot, ControlRequest};
    pub use crate::define_plugin;
    pub use crate::hook::{HookEvent, HookKind};
    pub use crate::plugin::{
        PluginDescriptor, PluginInitContext, command, hook, idle, init, on_unknown,
    };
}
