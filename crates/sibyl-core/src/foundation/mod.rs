//! Foundation layer: value types shared by every other layer.

pub mod error;
pub mod message;

pub use error::{ModelError, ProtocolError, ProtocolResult};
pub use message::{
    Message, MessageBuilder, MessageKind, Outgoing, Room, RoomFilter, RoomState, Status, Target,
    User, UserKind,
};
