//! Room membership bookkeeping.

use std::collections::HashMap;

use sibyl_core::{Room, RoomFilter, RoomState};

/// Tracks the [`RoomState`] of every room the bot was asked to join.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<Room, RoomState>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `room` as pending. Returns `false` if it is already pending or
    /// joined, in which case no new join should be sent.
    pub fn request_join(&mut self, room: Room) -> bool {
        let state = self.rooms.entry(room).or_default();
        if *state == RoomState::Parted {
            *state = RoomState::Pending;
            true
        } else {
            false
        }
    }

    /// Starts tracking `room` as parted so it is joined on the next connect.
    /// Returns `false` if the room was already tracked.
    pub fn track(&mut self, room: Room) -> bool {
        if self.rooms.contains_key(&room) {
            return false;
        }
        self.rooms.insert(room, RoomState::Parted);
        true
    }

    pub fn joined(&mut self, room: Room) {
        self.rooms.insert(room, RoomState::In);
    }

    pub fn join_failed(&mut self, room: &Room) {
        if let Some(state) = self.rooms.get_mut(room) {
            *state = RoomState::Parted;
        }
    }

    pub fn parted(&mut self, room: &Room) {
        if let Some(state) = self.rooms.get_mut(room) {
            *state = RoomState::Parted;
        }
    }

    /// Drops `room` after an explicit part, returning its last state.
    pub fn forget(&mut self, room: &Room) -> Option<RoomState> {
        self.rooms.remove(room)
    }

    /// Every tracked room with its state.
    pub fn snapshot(&self) -> impl Iterator<Item = (Room, RoomState)> + '_ {
        self.rooms.iter().map(|(room, state)| (room.clone(), *state))
    }

    /// Marks every room of a disconnected protocol as parted.
    pub fn reset_protocol(&mut self, protocol: &str) {
        for (room, state) in &mut self.rooms {
            if room.protocol() == protocol {
                *state = RoomState::Parted;
            }
        }
    }

    pub fn state(&self, room: &Room) -> RoomState {
        self.rooms.get(room).copied().unwrap_or_default()
    }

    pub fn in_room(&self, room: &Room) -> bool {
        self.state(room) == RoomState::In
    }

    /// Rooms of `protocol` matching `filter`, sorted by name.
    pub fn rooms(&self, protocol: &str, filter: RoomFilter) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|(room, state)| room.protocol() == protocol && filter.matches(**state))
            .map(|(room, _)| room.clone())
            .collect();
        rooms.sort_by(|a, b| a.name().cmp(b.name()));
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_and_filters() {
        let mut table = RoomTable::new();
        let lobby = Room::new("xmpp", "lobby");
        let dev = Room::new("xmpp", "dev");
        let ops = Room::new("irc", "ops");

        assert!(table.request_join(lobby.clone()));
        assert!(!table.request_join(lobby.clone()));
        assert!(table.request_join(dev.clone()));
        assert!(table.request_join(ops.clone()));
        table.joined(lobby.clone());
        table.join_failed(&dev);

        assert_eq!(table.rooms("xmpp", RoomFilter::In), vec![lobby.clone()]);
        assert_eq!(table.rooms("xmpp", RoomFilter::Parted), vec![dev.clone()]);
        assert_eq!(table.rooms("xmpp", RoomFilter::All), vec![dev.clone(), lobby.clone()]);
        assert_eq!(table.rooms("irc", RoomFilter::Out), vec![ops.clone()]);
        assert_eq!(table.rooms("irc", RoomFilter::Active), vec![ops.clone()]);

        table.reset_protocol("xmpp");
        assert!(!table.in_room(&lobby));
        assert_eq!(table.state(&ops), RoomState::Pending);
        assert!(table.request_join(lobby));
    }

    #[test]
    fn test_forget_stops_tracking() {
        let mut table = RoomTable::new();
        let lobby = Room::new("xmpp", "lobby").with_nick("sib");
        table.request_join(lobby.clone());
        table.joined(Room::new("xmpp", "lobby"));

        assert_eq!(table.snapshot().count(), 1);
        let (kept, _) = table.snapshot().next().unwrap();
        assert_eq!(kept.nick(), Some("sib"));

        assert!(!table.track(lobby.clone()));
        assert_eq!(table.forget(&lobby), Some(RoomState::In));
        assert_eq!(table.forget(&lobby), None);
        assert!(table.rooms("xmpp", RoomFilter::All).is_empty());
    }
}
