//! Deferred send queue.
//!
//! Every outbound message is [offered](Outbox::offer) here first. If its
//! destination is reachable it goes straight to the protocol; otherwise it is
//! parked until the protocol reconnects (direct messages) or the room is
//! joined again (room messages). Requeued messages wait in a pending queue
//! that the main loop drains on its next idle tick.
//!
//! Parking is bounded by four ceilings: total, per protocol, per room and per
//! user. When one is reached, the oldest entry of that dimension is evicted
//! to make room, so each dimension behaves as a bounded FIFO.

use std::collections::{HashMap, VecDeque};

use sibyl_core::{Outgoing, Room, Target};
use tracing::{debug, warn};

/// What the outbox needs to know about the outside world.
pub trait Reachability {
    fn is_connected(&self, protocol: &str) -> bool;
    fn in_room(&self, room: &Room) -> bool;
}

/// Ceilings of the deferred queue. `0` disables a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxLimits {
    pub max_total: usize,
    pub max_per_protocol: usize,
    pub max_per_room: usize,
    pub max_per_user: usize,
}

impl OutboxLimits {
    pub const UNLIMITED: Self = Self {
        max_total: 0,
        max_per_protocol: 0,
        max_per_room: 0,
        max_per_user: 0,
    };
}

/// Result of [`Outbox::offer`].
#[derive(Debug, PartialEq)]
pub enum Offer {
    /// Reachable: the caller must send it now.
    Deliver(Outgoing),
    /// Parked. `evicted` is the entry dropped to make room, if any.
    Deferred { evicted: Option<Outgoing> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dimension {
    Target,
    Protocol,
    Total,
}

#[derive(Debug)]
pub struct Outbox {
    limits: OutboxLimits,
    deferred: VecDeque<Outgoing>,
    pending: VecDeque<Outgoing>,
    per_protocol: HashMap<String, usize>,
    per_target: HashMap<Target, usize>,
}

fn at_ceiling(count: usize, limit: usize) -> bool {
    limit > 0 && count >= limit
}

impl Outbox {
    pub fn new(limits: OutboxLimits) -> Self {
        Self {
            limits,
            deferred: VecDeque::new(),
            pending: VecDeque::new(),
            per_protocol: HashMap::new(),
            per_target: HashMap::new(),
        }
    }

    /// Delivers or parks `out`.
    pub fn offer(&mut self, out: Outgoing, world: &impl Reachability) -> Offer {
        let reachable = world.is_connected(out.protocol())
            && match &out.target {
                Target::User(_) => true,
                Target::Room(room) => world.in_room(room),
            };
        if reachable {
            return Offer::Deliver(out);
        }
        let evicted = self.defer(out);
        Offer::Deferred { evicted }
    }

    /// Parks `out` unconditionally, evicting at most one entry.
    pub fn defer(&mut self, out: Outgoing) -> Option<Outgoing> {
        let evicted = self.over_budget(&out).and_then(|dim| self.evict(dim, &out));
        if let Some(old) = &evicted {
            warn!(destination = %old.target, "Deferred queue full, oldest message dropped");
        }
        debug!(destination = %out.target, "Message deferred");
        self.count(&out, true);
        self.deferred.push_back(out);
        evicted
    }

    fn over_budget(&self, out: &Outgoing) -> Option<Dimension> {
        let target_limit = if out.target.is_room() {
            self.limits.max_per_room
        } else {
            self.limits.max_per_user
        };
        if at_ceiling(self.deferred_for_target(&out.target), target_limit) {
            Some(Dimension::Target)
        } else if at_ceiling(self.deferred_for_protocol(out.protocol()), self.limits.max_per_protocol) {
            Some(Dimension::Protocol)
        } else if at_ceiling(self.deferred.len(), self.limits.max_total) {
            Some(Dimension::Total)
        } else {
            None
        }
    }

    fn evict(&mut self, dim: Dimension, incoming: &Outgoing) -> Option<Outgoing> {
        let idx = self.deferred.iter().position(|o| match dim {
            Dimension::Target => o.target == incoming.target,
            Dimension::Protocol => o.protocol() == incoming.protocol(),
            Dimension::Total => true,
        })?;
        let old = self.deferred.remove(idx)?;
        self.count(&old, false);
        Some(old)
    }

    fn count(&mut self, out: &Outgoing, add: bool) {
        fn bump<K: std::hash::Hash + Eq>(map: &mut HashMap<K, usize>, key: K, add: bool) {
            if add {
                *map.entry(key).or_default() += 1;
            } else if let Some(n) = map.get_mut(&key) {
                *n -= 1;
                if *n == 0 {
                    map.remove(&key);
                }
            }
        }
        bump(&mut self.per_protocol, out.protocol().to_string(), add);
        bump(&mut self.per_target, out.target.clone(), add);
    }

    fn requeue_where(&mut self, pred: impl Fn(&Outgoing) -> bool) -> usize {
        let mut moved = 0;
        let mut kept = VecDeque::with_capacity(self.deferred.len());
        for out in std::mem::take(&mut self.deferred) {
            if pred(&out) {
                self.count(&out, false);
                self.pending.push_back(out);
                moved += 1;
            } else {
                kept.push_back(out);
            }
        }
        self.deferred = kept;
        moved
    }

    /// Moves every parked direct message of `protocol` to the pending queue.
    pub fn on_connected(&mut self, protocol: &str) -> usize {
        let moved =
            self.requeue_where(|o| matches!(&o.target, Target::User(u) if u.protocol() == protocol));
        if moved > 0 {
            debug!(protocol, moved, "Requeued direct messages after connect");
        }
        moved
    }

    /// Moves every parked message for `room` to the pending queue.
    pub fn on_room_joined(&mut self, room: &Room) -> usize {
        let moved = self.requeue_where(|o| matches!(&o.target, Target::Room(r) if r == room));
        if moved > 0 {
            debug!(room = %room, moved, "Requeued room messages after join");
        }
        moved
    }

    /// Takes the requeued messages, oldest first.
    pub fn take_pending(&mut self) -> Vec<Outgoing> {
        self.pending.drain(..).collect()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn deferred_for_protocol(&self, protocol: &str) -> usize {
        self.per_protocol.get(protocol).copied().unwrap_or(0)
    }

    pub fn deferred_for_target(&self, target: &Target) -> usize {
        self.per_target.get(target).copied().unwrap_or(0)
    }
}
