//! # Sibyl Core
//!
//! Value types and the adapter contract of the Sibyl chat-bot framework.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Message Model**: [`User`], [`Room`], [`Message`], [`Target`], [`Outgoing`]
//! - **Room lifecycle**: [`RoomState`] and the aggregate [`RoomFilter`]
//! - **Errors**: [`ModelError`], [`ProtocolError`]
//!
//! ### Integration Layer
//!
//! - **Adapters**: the [`Protocol`] trait and [`ConfigurableProtocol`]
//! - **Callbacks**: [`ProtocolContext`] and [`ProtocolEvent`]
//! - **Lookup**: [`ProtocolTable`], mapping protocol names to live adapters
//!
//! ```text
//! ┌──────────┐  ProtocolEvent  ┌───────────┐   Outgoing   ┌──────────┐
//! │ Protocol │───────────────▶│ main loop │─────────────▶│ Protocol │
//! └──────────┘                 └───────────┘              └──────────┘
//! ```

pub mod foundation;
pub mod integration;

pub use foundation::{
    Message, MessageBuilder, MessageKind, ModelError, Outgoing, ProtocolError, ProtocolResult,
    Room, RoomFilter, RoomState, Status, Target, User, UserKind,
};
pub use integration::{
    BoxedProtocol, ConfigurableProtocol, Protocol, ProtocolContext, ProtocolEvent, ProtocolTable,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::integration::{
        BoxedProtocol, ConfigurableProtocol, Protocol, ProtocolContext, ProtocolTable,
    };
}
