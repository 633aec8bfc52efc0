//! The normalized message model.
//!
//! Every protocol adapter translates its wire events into these types, and
//! the dispatcher never sees anything else. Identity values ([`User`],
//! [`Room`]) refer back to their protocol by name rather than by pointer, so
//! they can be serialized and later re-hydrated through a
//! [`ProtocolTable`](crate::integration::ProtocolTable).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ModelError;

// ============================================================================
// User
// ============================================================================

/// Whether a user was seen directly or through a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    /// A directly addressable account.
    Private,
    /// An occupant of a room, possibly masked by a room nick.
    Group,
}

/// A message sender within one protocol.
///
/// Two users are equal when they share the protocol and the id. Adapters
/// that model per-room anonymity put the room nick into the id, and record
/// the stable identity (if known) in [`real`](Self::real).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    protocol: String,
    id: String,
    kind: UserKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    real: Option<Box<User>>,
}

impl User {
    /// Creates a user. Adapters normally go through
    /// [`Protocol::new_user`](crate::integration::Protocol::new_user).
    pub fn new(protocol: impl Into<String>, id: impl Into<String>, kind: UserKind) -> Self {
        Self {
            protocol: protocol.into(),
            id: id.into(),
            kind,
            real: None,
        }
    }

    /// Name of the protocol this user belongs to.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Protocol-specific identifier, including any resource or room nick.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> UserKind {
        self.kind
    }

    /// The stable identity behind this user; the user itself when unknown.
    pub fn real(&self) -> &User {
        self.real.as_deref().unwrap_or(self)
    }

    /// Records the stable identity behind a masked user.
    ///
    /// The real identity must live on the same protocol.
    pub fn set_real(&mut self, real: User) -> Result<(), ModelError> {
        if real.protocol != self.protocol {
            return Err(ModelError::ProtocolMismatch {
                expected: self.protocol.clone(),
                got: real.protocol,
            });
        }
        // A real identity never carries its own mask.
        let real = User { real: None, ..real };
        self.real = if real == *self { None } else { Some(Box::new(real)) };
        Ok(())
    }

    /// Builder-style variant of [`set_real`](Self::set_real).
    pub fn with_real(mut self, real: User) -> Result<Self, ModelError> {
        self.set_real(real)?;
        Ok(self)
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol && self.id == other.id
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

// ============================================================================
// Room
// ============================================================================

/// A joinable group-chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    protocol: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

impl Room {
    pub fn new(protocol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            name: name.into(),
            nick: None,
            password: None,
        }
    }

    /// Sets the nick to use in this room instead of the bot's default.
    pub fn with_nick(mut self, nick: impl Into<String>) -> Self {
        self.nick = Some(nick.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nick(&self) -> Option<&str> {
        self.nick.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl PartialEq for Room {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol && self.name == other.name
    }
}

impl Eq for Room {}

impl Hash for Room {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lifecycle state of a room.
///
/// ```text
/// Parted ──join──► Pending ──ok────► In
///    ▲                │               │
///    └────failure─────┘◄─────part─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoomState {
    #[default]
    Parted,
    /// Join requested, awaiting confirmation.
    Pending,
    In,
}

/// Selects rooms by state, including the aggregate selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomFilter {
    Parted,
    Pending,
    In,
    /// `In` or `Pending`.
    Active,
    /// `Parted` or `Pending`.
    Out,
    All,
}

impl RoomFilter {
    pub fn matches(self, state: RoomState) -> bool {
        match self {
            Self::Parted => state == RoomState::Parted,
            Self::Pending => state == RoomState::Pending,
            Self::In => state == RoomState::In,
            Self::Active => matches!(state, RoomState::In | RoomState::Pending),
            Self::Out => matches!(state, RoomState::Parted | RoomState::Pending),
            Self::All => true,
        }
    }
}

// ============================================================================
// Message kind and status
// ============================================================================

/// Type tag of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Status,
    Private,
    Group,
    Error,
}

impl TryFrom<u8> for MessageKind {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, ModelError> {
        match value {
            0 => Ok(Self::Status),
            1 => Ok(Self::Private),
            2 => Ok(Self::Group),
            3 => Ok(Self::Error),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

impl FromStr for MessageKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "status" => Ok(Self::Status),
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            "error" => Ok(Self::Error),
            _ => Err(ModelError::UnknownKind(s.to_string())),
        }
    }
}

/// Presence status carried by `Status` messages.
///
/// Ordered from least to most available; `Unknown` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unknown,
    Offline,
    ExtAway,
    Away,
    Dnd,
    Available,
}

impl TryFrom<i8> for Status {
    type Error = ModelError;

    fn try_from(value: i8) -> Result<Self, ModelError> {
        match value {
            -1 => Ok(Self::Unknown),
            0 => Ok(Self::Offline),
            1 => Ok(Self::ExtAway),
            2 => Ok(Self::Away),
            3 => Ok(Self::Dnd),
            4 => Ok(Self::Available),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for Status {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "offline" => Ok(Self::Offline),
            "ext_away" | "xa" => Ok(Self::ExtAway),
            "away" => Ok(Self::Away),
            "dnd" => Ok(Self::Dnd),
            "available" | "online" => Ok(Self::Available),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A normalized inbound event.
///
/// Built through [`Message::builder`]. Immutable once built, except that its
/// text may be assigned exactly once if the builder left it empty.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    user: User,
    text: Option<String>,
    status: Option<Status>,
    status_msg: Option<String>,
    room: Option<Room>,
    to: Option<Target>,
    broadcast: bool,
    extra_users: Vec<User>,
    hook: bool,
    emote: bool,
}

impl Message {
    /// Starts building a message of `kind` sent by `user`.
    pub fn builder(kind: MessageKind, user: User) -> MessageBuilder {
        MessageBuilder {
            msg: Message {
                kind,
                user,
                text: None,
                status: None,
                status_msg: None,
                room: None,
                to: None,
                broadcast: false,
                extra_users: Vec::new(),
                hook: true,
                emote: false,
            },
        }
    }

    /// Shorthand for a private text message.
    pub fn private(user: User, text: impl Into<String>) -> Self {
        Self {
            text: Some(canonical_text(text.into())),
            ..Self::builder(MessageKind::Private, user).msg
        }
    }

    /// Shorthand for a group text message from `user` in `room`.
    pub fn group(room: Room, user: User, text: impl Into<String>) -> Self {
        Self {
            text: Some(canonical_text(text.into())),
            room: Some(room),
            ..Self::builder(MessageKind::Group, user).msg
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// Protocol the message arrived on.
    pub fn protocol(&self) -> &str {
        self.user.protocol()
    }

    /// The message text; empty when none was set.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Assigns the text of a message built without one.
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), ModelError> {
        if self.text.is_some() {
            return Err(ModelError::TextAlreadySet);
        }
        self.text = Some(canonical_text(text.into()));
        Ok(())
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn status_msg(&self) -> Option<&str> {
        self.status_msg.as_deref()
    }

    /// Room the message originated in, for group messages.
    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn to(&self) -> Option<&Target> {
        self.to.as_ref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    pub fn extra_users(&self) -> &[User] {
        &self.extra_users
    }

    /// Whether send-hooks run for this message.
    pub fn runs_hooks(&self) -> bool {
        self.hook
    }

    pub fn is_emote(&self) -> bool {
        self.emote
    }

    /// Where a reply to this message should go: the room for group
    /// messages, the sender otherwise.
    pub fn reply_target(&self) -> Target {
        match (&self.kind, &self.room) {
            (MessageKind::Group, Some(room)) => Target::Room(room.clone()),
            _ => Target::User(self.user.clone()),
        }
    }
}

/// Builder for [`Message`].
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    msg: Message,
}

impl MessageBuilder {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.msg.text = Some(canonical_text(text.into()));
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.msg.status = Some(status);
        self
    }

    pub fn status_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg.status_msg = Some(msg.into());
        self
    }

    pub fn room(mut self, room: Room) -> Self {
        self.msg.room = Some(room);
        self
    }

    pub fn to(mut self, target: Target) -> Self {
        self.msg.to = Some(target);
        self
    }

    pub fn broadcast(mut self, broadcast: bool) -> Self {
        self.msg.broadcast = broadcast;
        self
    }

    pub fn extra_users(mut self, users: Vec<User>) -> Self {
        self.msg.extra_users = users;
        self
    }

    pub fn hook(mut self, hook: bool) -> Self {
        self.msg.hook = hook;
        self
    }

    pub fn emote(mut self, emote: bool) -> Self {
        self.msg.emote = emote;
        self
    }

    /// Validates and returns the message.
    pub fn build(mut self) -> Result<Message, ModelError> {
        match self.msg.kind {
            MessageKind::Group if self.msg.room.is_none() => return Err(ModelError::MissingRoom),
            MessageKind::Status if self.msg.status.is_none() => {
                self.msg.status = Some(Status::Unknown);
            }
            _ => {}
        }
        if let Some(room) = &self.msg.room
            && room.protocol() != self.msg.user.protocol()
        {
            return Err(ModelError::ProtocolMismatch {
                expected: self.msg.user.protocol().to_string(),
                got: room.protocol().to_string(),
            });
        }
        Ok(self.msg)
    }
}

/// Normalizes line endings so handlers never see `\r`.
fn canonical_text(text: String) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Destination of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    User(User),
    Room(Room),
}

impl Target {
    pub fn protocol(&self) -> &str {
        match self {
            Self::User(user) => user.protocol(),
            Self::Room(room) => room.protocol(),
        }
    }

    pub fn is_room(&self) -> bool {
        matches!(self, Self::Room(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(user) => write!(f, "{}:{}", user.protocol(), user),
            Self::Room(room) => write!(f, "{}:room:{}", room.protocol(), room),
        }
    }
}

impl From<User> for Target {
    fn from(user: User) -> Self {
        Self::User(user)
    }
}

impl From<Room> for Target {
    fn from(room: Room) -> Self {
        Self::Room(room)
    }
}

/// An outbound message on its way to a protocol.
///
/// This is also the unit held by the deferred send queue while its
/// destination is unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outgoing {
    pub text: String,
    pub target: Target,
    /// Highlight every occupant of the target room.
    #[serde(default)]
    pub broadcast: bool,
    /// The user whose request produced this message.
    #[serde(default)]
    pub from: Option<User>,
    /// Additional users to highlight.
    #[serde(default)]
    pub extra_users: Vec<User>,
    /// Whether send-hooks run after delivery.
    #[serde(default = "default_hook")]
    pub hook: bool,
}

fn default_hook() -> bool {
    true
}

impl Outgoing {
    pub fn new(text: impl Into<String>, target: impl Into<Target>) -> Self {
        Self {
            text: canonical_text(text.into()),
            target: target.into(),
            broadcast: false,
            from: None,
            extra_users: Vec::new(),
            hook: true,
        }
    }

    pub fn broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn from_user(mut self, user: User) -> Self {
        self.from = Some(user);
        self
    }

    pub fn extra_users(mut self, users: Vec<User>) -> Self {
        self.extra_users = users;
        self
    }

    /// Skips send-hooks for this message.
    pub fn without_hooks(mut self) -> Self {
        self.hook = false;
        self
    }

    pub fn protocol(&self) -> &str {
        self.target.protocol()
    }
}
