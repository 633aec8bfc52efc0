//! Name → instance lookup for protocols.
//!
//! Model values carry their protocol by name; this table turns that name back
//! into the live adapter.

use std::collections::BTreeMap;

use super::protocol::BoxedProtocol;
use crate::foundation::message::{Room, Target, User, UserKind};

/// Registered protocols, keyed by [`Protocol::name`](super::Protocol::name).
///
/// Populated once at startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct ProtocolTable {
    protocols: BTreeMap<String, BoxedProtocol>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a protocol. Returns `false`, leaving the table unchanged, when
    /// the name is already taken.
    pub fn insert(&mut self, protocol: BoxedProtocol) -> bool {
        let name = protocol.name().to_string();
        if self.protocols.contains_key(&name) {
            return false;
        }
        self.protocols.insert(name, protocol);
        true
    }

    pub fn get(&self, name: &str) -> Option<&BoxedProtocol> {
        self.protocols.get(name)
    }

    /// The protocol a target belongs to.
    pub fn for_target(&self, target: &Target) -> Option<&BoxedProtocol> {
        self.get(target.protocol())
    }

    /// Re-creates a user through its protocol's factory.
    pub fn user(&self, protocol: &str, id: &str, kind: UserKind) -> Option<User> {
        self.get(protocol).map(|p| p.new_user(id, kind, None))
    }

    /// Re-creates a room through its protocol's factory.
    pub fn room(&self, protocol: &str, name: &str) -> Option<Room> {
        self.get(protocol).map(|p| p.new_room(name, None, None))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.protocols.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoxedProtocol)> {
        self.protocols.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

impl std::fmt::Debug for ProtocolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.protocols.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::foundation::error::ProtocolResult;
    use crate::foundation::message::Outgoing;
    use crate::integration::{Protocol, ProtocolContext};

    struct Stub(&'static str);

    #[async_trait]
    impl Protocol for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn setup(&self, _ctx: ProtocolContext) {}
        async fn connect(&self) -> ProtocolResult<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn process(&self) -> ProtocolResult<()> {
            Ok(())
        }
        async fn send(&self, _msg: &Outgoing) -> ProtocolResult<()> {
            Ok(())
        }
        fn get_user(&self) -> User {
            User::new(self.0, "bot", UserKind::Private)
        }
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut table = ProtocolTable::new();
        assert!(table.insert(Arc::new(Stub("xmpp"))));
        assert!(!table.insert(Arc::new(Stub("xmpp"))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rehydrate_through_factory() {
        let mut table = ProtocolTable::new();
        table.insert(Arc::new(Stub("irc")));

        let user = table.user("irc", "carol", UserKind::Private).unwrap();
        assert_eq!(user.protocol(), "irc");
        let room = table.room("irc", "#rust").unwrap();
        assert_eq!(table.for_target(&Target::Room(room)).unwrap().name(), "irc");
        assert!(table.user("xmpp", "carol", UserKind::Private).is_none());
    }
}
