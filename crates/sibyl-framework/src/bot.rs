//! The bot handle given to every handler and hook.
//!
//! [`Bot`] is a cheap `Arc` clone. It never touches a protocol directly:
//! outgoing messages and control requests go through unbounded hand-off
//! queues drained by the main loop, so a worker task and the main loop can
//! both use the same handle.
//!
//! Room membership is read from a snapshot the main loop republishes after
//! every change; joins and parts are requested like any other control
//! change.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sibyl_core::{BoxedProtocol, Message, Outgoing, ProtocolTable, Room, RoomFilter, RoomState, Target};
use tokio::sync::mpsc;

use crate::command::CommandRegistry;
use crate::error::BotClosed;
use crate::plugin::ExtensionStore;

/// A state change that only the main loop may perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    AddAlias { name: String, template: String },
    AddTrigger { name: String, reply: String },
    /// Removes an alias or trigger.
    RemoveOverlay { name: String },
    /// Deregisters an idle hook by name.
    DisableIdle { name: String },
    /// Joins a room now, or once its protocol is connected.
    JoinRoom {
        protocol: String,
        name: String,
        nick: Option<String>,
        password: Option<String>,
    },
    PartRoom { protocol: String, name: String },
    Shutdown { reason: String },
}

/// Listing entry returned by [`Bot::commands`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub namespace: String,
}

struct BotInner {
    nick: String,
    protocols: Arc<ProtocolTable>,
    registry: Arc<RwLock<CommandRegistry>>,
    state: ExtensionStore,
    plugin_configs: HashMap<String, Arc<serde_json::Value>>,
    rooms: RwLock<HashMap<Room, RoomState>>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    control: mpsc::UnboundedSender<ControlRequest>,
}

/// Shared handle to the running bot.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

/// Receiving ends of the bot's hand-off queues, owned by the main loop.
pub struct BotChannels {
    pub outbound: mpsc::UnboundedReceiver<Outgoing>,
    pub control: mpsc::UnboundedReceiver<ControlRequest>,
}

/// Builder for [`Bot`].
#[derive(Default)]
pub struct BotBuilder {
    nick: String,
    protocols: ProtocolTable,
    plugin_configs: HashMap<String, serde_json::Value>,
}

impl BotBuilder {
    pub fn protocols(mut self, protocols: ProtocolTable) -> Self {
        self.protocols = protocols;
        self
    }

    /// Adds the configuration section of one plugin.
    pub fn plugin_config(mut self, plugin: impl Into<String>, config: serde_json::Value) -> Self {
        self.plugin_configs.insert(plugin.into(), config);
        self
    }

    pub fn build(self) -> (Bot, BotChannels) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let inner = BotInner {
            nick: self.nick,
            protocols: Arc::new(self.protocols),
            registry: Arc::new(RwLock::new(CommandRegistry::new())),
            state: ExtensionStore::new(),
            plugin_configs: self
                .plugin_configs
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
            rooms: RwLock::new(HashMap::new()),
            outbound: out_tx,
            control: ctl_tx,
        };
        let channels = BotChannels {
            outbound: out_rx,
            control: ctl_rx,
        };
        (
            Bot {
                inner: Arc::new(inner),
            },
            channels,
        )
    }
}

impl Bot {
    pub fn builder(nick: impl Into<String>) -> BotBuilder {
        BotBuilder {
            nick: nick.into(),
            ..Default::default()
        }
    }

    /// The bot's default nick.
    pub fn nick(&self) -> &str {
        &self.inner.nick
    }

    pub fn protocols(&self) -> &ProtocolTable {
        &self.inner.protocols
    }

    /// Looks up a protocol instance by name.
    pub fn protocol(&self, name: &str) -> Option<&BoxedProtocol> {
        self.inner.protocols.get(name)
    }

    /// The command registry.
    ///
    /// Handlers should only read it; changes go through [`Bot::request`] so the
    /// main loop stays the single writer.
    pub fn registry(&self) -> &Arc<RwLock<CommandRegistry>> {
        &self.inner.registry
    }

    /// Namespace that owns a command name.
    pub fn which(&self, name: &str) -> Option<String> {
        self.inner.registry.read().which(name).map(str::to_string)
    }

    /// Visible commands, sorted by name.
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.inner
            .registry
            .read()
            .commands()
            .into_iter()
            .map(|e| CommandInfo {
                name: e.name().to_string(),
                namespace: e.namespace().to_string(),
            })
            .collect()
    }

    pub fn state(&self) -> &ExtensionStore {
        &self.inner.state
    }

    /// Configuration section of a plugin, `null` when absent.
    pub fn plugin_config(&self, plugin: &str) -> Arc<serde_json::Value> {
        self.inner
            .plugin_configs
            .get(plugin)
            .cloned()
            .unwrap_or_else(|| Arc::new(serde_json::Value::Null))
    }

    /// Rooms of `protocol` in a state matched by `filter`, sorted by name.
    pub fn rooms(&self, protocol: &str, filter: RoomFilter) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .inner
            .rooms
            .read()
            .iter()
            .filter(|(room, state)| room.protocol() == protocol && filter.matches(**state))
            .map(|(room, _)| room.clone())
            .collect();
        rooms.sort_by(|a, b| a.name().cmp(b.name()));
        rooms
    }

    pub fn room_state(&self, room: &Room) -> RoomState {
        self.inner.rooms.read().get(room).copied().unwrap_or_default()
    }

    /// Replaces the room snapshot. Only the main loop calls this.
    pub fn publish_rooms(&self, rooms: impl IntoIterator<Item = (Room, RoomState)>) {
        *self.inner.rooms.write() = rooms.into_iter().collect();
    }

    /// Asks the main loop to join `room`.
    pub fn join_room(&self, room: &Room) -> Result<(), BotClosed> {
        self.request(ControlRequest::JoinRoom {
            protocol: room.protocol().to_string(),
            name: room.name().to_string(),
            nick: room.nick().map(str::to_string),
            password: room.password().map(str::to_string),
        })
    }

    /// Asks the main loop to leave `room`.
    pub fn part_room(&self, room: &Room) -> Result<(), BotClosed> {
        self.request(ControlRequest::PartRoom {
            protocol: room.protocol().to_string(),
            name: room.name().to_string(),
        })
    }

    /// Queues a message for delivery through the outbox.
    pub fn send(&self, out: Outgoing) -> Result<(), BotClosed> {
        self.inner.outbound.send(out).map_err(|_| BotClosed)
    }

    /// Queues `text` to `target`.
    pub fn say(&self, target: impl Into<Target>, text: impl Into<String>) -> Result<(), BotClosed> {
        self.send(Outgoing::new(text, target.into()))
    }

    /// Replies where `msg` came from: its room for group messages, its
    /// sender otherwise.
    pub fn reply(&self, msg: &Message, text: impl Into<String>) -> Result<(), BotClosed> {
        self.send(Outgoing::new(text, msg.reply_target()))
    }

    /// Hands a control request to the main loop.
    pub fn request(&self, req: ControlRequest) -> Result<(), BotClosed> {
        self.inner.control.send(req).map_err(|_| BotClosed)
    }

    /// Asks the main loop for an orderly shutdown.
    pub fn shutdown(&self, reason: impl Into<String>) -> Result<(), BotClosed> {
        self.request(ControlRequest::Shutdown {
            reason: reason.into(),
        })
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("nick", &self.inner.nick)
            .field("protocols", &self.inner.protocols)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) fn test_bot() -> (Bot, BotChannels) {
        Bot::builder("SibylBot").build()
    }
}

#[cfg(test)]
mod tests {
    use sibyl_core::{Room, User, UserKind};

    use super::testing::test_bot;
    use super::*;

    #[test]
    fn test_reply_targets_room_for_group_messages() {
        let (bot, mut rx) = test_bot();
        let room = Room::new("xmpp", "lobby@conf");
        let user = User::new("xmpp", "lobby@conf/alice", UserKind::Group);
        let msg = Message::group(room.clone(), user, "hi");

        bot.reply(&msg, "hello").unwrap();
        let out = rx.outbound.try_recv().unwrap();
        assert_eq!(out.target, Target::Room(room));
        assert_eq!(out.text, "hello");
    }

    #[test]
    fn test_send_after_loop_stopped() {
        let (bot, channels) = test_bot();
        drop(channels);
        let user = User::new("cli", "me", UserKind::Private);
        assert_eq!(bot.say(user, "x"), Err(BotClosed));
        assert_eq!(bot.shutdown("bye"), Err(BotClosed));
    }

    #[test]
    fn test_room_requests_and_snapshot() {
        let (bot, mut rx) = test_bot();
        let lobby = Room::new("xmpp", "lobby@conf").with_nick("sib");
        bot.join_room(&lobby).unwrap();
        assert_eq!(
            rx.control.try_recv().unwrap(),
            ControlRequest::JoinRoom {
                protocol: "xmpp".into(),
                name: "lobby@conf".into(),
                nick: Some("sib".into()),
                password: None,
            }
        );
        bot.part_room(&lobby).unwrap();
        assert_eq!(
            rx.control.try_recv().unwrap(),
            ControlRequest::PartRoom {
                protocol: "xmpp".into(),
                name: "lobby@conf".into(),
            }
        );

        let dev = Room::new("xmpp", "dev@conf");
        bot.publish_rooms([(lobby.clone(), RoomState::In), (dev.clone(), RoomState::Pending)]);
        assert_eq!(bot.rooms("xmpp", RoomFilter::In), vec![lobby.clone()]);
        assert_eq!(bot.rooms("xmpp", RoomFilter::Active), vec![dev.clone(), lobby]);
        assert!(bot.rooms("irc", RoomFilter::All).is_empty());
        assert_eq!(bot.room_state(&Room::new("xmpp", "gone")), RoomState::Parted);
    }

    #[test]
    fn test_missing_plugin_config_is_null() {
        let (bot, _rx) = Bot::builder("b")
            .plugin_config("dice", serde_json::json!({ "max": 6 }))
            .build();
        assert_eq!(bot.plugin_config("dice")["max"], 6);
        assert!(bot.plugin_config("nope").is_null());
    }
}
