//! Callback channel from adapters into the main loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::foundation::message::{Message, Room};

/// An event reported by an adapter.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// A fully parsed inbound message.
    Message(Message),
    /// A join request succeeded.
    RoomJoined(Room),
    /// A join request failed.
    RoomJoinFailed { room: Room, reason: String },
    /// The bot left a room, voluntarily or not.
    RoomParted(Room),
    /// The adapter asks the whole bot to stop (e.g. the console was closed).
    ShutdownRequested { protocol: String, reason: String },
}

/// Handle given to each adapter in [`Protocol::setup`](super::Protocol::setup).
///
/// Cheap to clone; adapters may move clones into background threads.
#[derive(Debug, Clone)]
pub struct ProtocolContext {
    protocol: Arc<str>,
    bot_nick: Arc<str>,
    events: mpsc::UnboundedSender<ProtocolEvent>,
}

impl ProtocolContext {
    pub fn new(
        protocol: impl Into<Arc<str>>,
        bot_nick: impl Into<Arc<str>>,
        events: mpsc::UnboundedSender<ProtocolEvent>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            bot_nick: bot_nick.into(),
            events,
        }
    }

    /// Name of the protocol this context belongs to.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The bot's configured default nick.
    pub fn bot_nick(&self) -> &str {
        &self.bot_nick
    }

    /// Reports an inbound message.
    pub fn message_received(&self, msg: Message) {
        debug!(protocol = %self.protocol, kind = ?msg.kind(), "Message received");
        self.emit(ProtocolEvent::Message(msg));
    }

    pub fn room_joined(&self, room: Room) {
        self.emit(ProtocolEvent::RoomJoined(room));
    }

    pub fn room_join_failed(&self, room: Room, reason: impl Into<String>) {
        self.emit(ProtocolEvent::RoomJoinFailed {
            room,
            reason: reason.into(),
        });
    }

    pub fn room_parted(&self, room: Room) {
        self.emit(ProtocolEvent::RoomParted(room));
    }

    pub fn request_shutdown(&self, reason: impl Into<String>) {
        self.emit(ProtocolEvent::ShutdownRequested {
            protocol: self.protocol.to_string(),
            reason: reason.into(),
        });
    }

    fn emit(&self, event: ProtocolEvent) {
        if self.events.send(event).is_err() {
            warn!(protocol = %self.protocol, "Event dropped: main loop is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::message::{User, UserKind};

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ProtocolContext::new("cli", "SibylBot", tx);
        let room = Room::new("cli", "lobby");

        ctx.room_joined(room.clone());
        ctx.message_received(Message::private(
            User::new("cli", "admin", UserKind::Private),
            "hello",
        ));

        assert!(matches!(rx.try_recv().unwrap(), ProtocolEvent::RoomJoined(r) if r == room));
        assert!(matches!(rx.try_recv().unwrap(), ProtocolEvent::Message(m) if m.text() == "hello"));
    }

    #[test]
    fn test_emit_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let ctx = ProtocolContext::new("cli", "SibylBot", tx);
        ctx.room_parted(Room::new("cli", "lobby"));
    }
}
