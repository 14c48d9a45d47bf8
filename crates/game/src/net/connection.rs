use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::protocol::{MAX_PLAYERS, PlayerId};

pub const LIVENESS_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Participant {
    pub player_id: PlayerId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
}

impl Participant {
    pub fn is_timed_out(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > window
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new participant. `ready` is set when this admission filled the table.
    Welcomed { player_id: PlayerId, ready: bool },
    Known(PlayerId),
    Full,
}

/// The relay's view of who is in the session. Identities come from a
/// monotonic counter and are never handed out twice.
#[derive(Debug)]
pub struct ParticipantTable {
    by_addr: HashMap<SocketAddr, PlayerId>,
    participants: HashMap<PlayerId, Participant>,
    next_player_id: PlayerId,
    capacity: usize,
    window: Duration,
    ready: bool,
}

impl Default for ParticipantTable {
    fn default() -> Self {
        Self::new(MAX_PLAYERS, LIVENESS_WINDOW)
    }
}

impl ParticipantTable {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            by_addr: HashMap::new(),
            participants: HashMap::new(),
            next_player_id: 0,
            capacity,
            window,
            ready: false,
        }
    }

    pub fn admit(&mut self, addr: SocketAddr, now: Instant) -> Admission {
        if let Some(&player_id) = self.by_addr.get(&addr) {
            self.touch(&addr, now);
            return Admission::Known(player_id);
        }

        if self.participants.len() >= self.capacity {
            return Admission::Full;
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;

        self.participants.insert(
            player_id,
            Participant {
                player_id,
                addr,
                last_seen: now,
            },
        );
        self.by_addr.insert(addr, player_id);

        let ready = !self.ready && self.participants.len() >= self.capacity;
        if ready {
            self.ready = true;
        }

        Admission::Welcomed { player_id, ready }
    }

    /// Refreshes liveness; returns the sender's identity when registered.
    pub fn touch(&mut self, addr: &SocketAddr, now: Instant) -> Option<PlayerId> {
        let player_id = *self.by_addr.get(addr)?;
        if let Some(participant) = self.participants.get_mut(&player_id) {
            participant.last_seen = now;
        }
        Some(player_id)
    }

    pub fn lookup(&self, addr: &SocketAddr) -> Option<PlayerId> {
        self.by_addr.get(addr).copied()
    }

    pub fn remove(&mut self, player_id: PlayerId) -> Option<Participant> {
        let participant = self.participants.remove(&player_id)?;
        self.by_addr.remove(&participant.addr);
        self.ready = false;
        Some(participant)
    }

    /// Removes everyone silent for longer than the liveness window. Clears
    /// the ready flag when anyone was evicted.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<Participant> {
        let stale: Vec<PlayerId> = self
            .participants
            .values()
            .filter(|p| p.is_timed_out(now, self.window))
            .map(|p| p.player_id)
            .collect();

        stale.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.by_addr.clear();
        self.ready = false;
    }
}
