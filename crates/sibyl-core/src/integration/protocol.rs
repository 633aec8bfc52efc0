//! The protocol adapter contract.
//!
//! Each back end (XMPP, IRC, a terminal, ...) implements [`Protocol`]. The main
//! loop owns the adapters and drives them cooperatively: it calls
//! [`connect`](Protocol::connect) until a session is up, then calls
//! [`process`](Protocol::process) repeatedly. `process` must return within a
//! short bounded time; adapters that need blocking I/O move it onto a
//! background thread and hand results over through a bounded channel.
//!
//! Inbound events never come back through return values. Adapters report them
//! through the [`ProtocolContext`] handed to [`setup`](Protocol::setup).
//!
//! # Example
//!
//! ```rust,ignore
//! #[async_trait]
//! impl Protocol for Loopback {
//!     fn name(&self) -> &str { "loopback" }
//!     fn setup(&self, ctx: ProtocolContext) { *self.ctx.lock() = Some(ctx); }
//!     async fn connect(&self) -> ProtocolResult<()> { Ok(()) }
//!     fn is_connected(&self) -> bool { true }
//!     async fn process(&self) -> ProtocolResult<()> { Ok(()) }
//!     async fn send(&self, msg: &Outgoing) -> ProtocolResult<()> { Ok(()) }
//!     // ...
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use super::context::ProtocolContext;
use crate::foundation::error::{ProtocolError, ProtocolResult};
use crate::foundation::message::{Outgoing, Room, User, UserKind};

/// A messaging back end.
///
/// All methods take `&self`; adapters keep their mutable session state behind
/// their own locks so the same instance can be shared with plugins through
/// the protocol table.
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// Stable name of this protocol instance, used as the back-reference in
    /// every [`User`] and [`Room`] it creates.
    fn name(&self) -> &str;

    /// One-time initialization before the first connect.
    fn setup(&self, ctx: ProtocolContext);

    /// Establishes a session.
    ///
    /// Fails with [`ProtocolError::ConnectFailure`] when a retry may help and
    /// with [`ProtocolError::AuthFailure`] when it will not.
    async fn connect(&self) -> ProtocolResult<()>;

    fn is_connected(&self) -> bool;

    /// Pumps a bounded amount of pending work.
    ///
    /// Every fully parsed inbound event is reported through the context.
    /// Dead connections surface as [`ProtocolError::PingTimeout`],
    /// [`ProtocolError::ConnectFailure`] or [`ProtocolError::ServerShutdown`].
    async fn process(&self) -> ProtocolResult<()>;

    /// Delivers a message to its target.
    async fn send(&self, msg: &Outgoing) -> ProtocolResult<()>;

    /// Delivers a message highlighting every occupant of the target room and
    /// returns the text actually sent.
    async fn broadcast(&self, msg: &Outgoing) -> ProtocolResult<String> {
        self.send(msg).await?;
        Ok(msg.text.clone())
    }

    /// Requests to join a room. The outcome arrives later through
    /// [`ProtocolContext::room_joined`] or [`ProtocolContext::room_join_failed`].
    async fn join_room(&self, room: &Room) -> ProtocolResult<()> {
        let _ = room;
        Err(ProtocolError::Unsupported("join_room"))
    }

    async fn part_room(&self, room: &Room) -> ProtocolResult<()> {
        let _ = room;
        Err(ProtocolError::Unsupported("part_room"))
    }

    /// Users currently present in `room`.
    fn get_occupants(&self, room: &Room) -> Vec<User> {
        let _ = room;
        Vec::new()
    }

    /// The nick the bot uses in `room`.
    fn get_nick(&self, room: &Room) -> String {
        room.nick()
            .map(str::to_string)
            .unwrap_or_else(|| self.get_user().id().to_string())
    }

    /// The stable identity behind `nick` in `room`, when the protocol exposes it.
    fn get_real(&self, room: &Room, nick: &str) -> User {
        self.new_user(&format!("{}/{}", room.name(), nick), UserKind::Group, None)
    }

    /// The bot's own account on this protocol.
    fn get_user(&self) -> User;

    /// Factory for users of this protocol.
    fn new_user(&self, id: &str, kind: UserKind, real: Option<User>) -> User {
        let user = User::new(self.name(), id, kind);
        match real {
            Some(real) => user.clone().with_real(real).unwrap_or(user),
            None => user,
        }
    }

    /// Factory for rooms of this protocol.
    fn new_room(&self, name: &str, nick: Option<&str>, password: Option<&str>) -> Room {
        let mut room = Room::new(self.name(), name);
        if let Some(nick) = nick {
            room = room.with_nick(nick);
        }
        if let Some(password) = password {
            room = room.with_password(password);
        }
        room
    }

    /// Closes the session and releases resources.
    async fn shutdown(&self) {}
}

/// A shared protocol trait object.
pub type BoxedProtocol = Arc<dyn Protocol>;

/// A protocol that can be built from its own section of the configuration.
///
/// The runtime looks up `protocols.<protocol_name>.settings`, deserializes it
/// into [`Config`](Self::Config) (or uses the default when absent), and calls
/// [`from_config`](Self::from_config).
pub trait ConfigurableProtocol: Protocol + Sized {
    /// Adapter-specific settings.
    type Config: serde::de::DeserializeOwned + Default;

    /// Configuration key and default instance name.
    fn protocol_name() -> &'static str;

    fn from_config(config: Self::Config) -> ProtocolResult<Arc<Self>>;
}
