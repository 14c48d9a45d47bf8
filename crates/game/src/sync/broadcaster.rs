use std::time::{Duration, Instant};

use crate::net::{Endpoint, Message, Relay};
use crate::snapshot::Snapshot;

/// Anything that can put a message on the wire toward the session.
pub trait MessageSink {
    fn send_message(&self, message: &Message) -> bool;
}

impl MessageSink for Endpoint {
    fn send_message(&self, message: &Message) -> bool {
        self.send(message)
    }
}

impl MessageSink for Relay {
    fn send_message(&self, message: &Message) -> bool {
        self.broadcast(message)
    }
}

/// Rate-limits `game_state_update`. Sends are fire-and-forget.
#[derive(Debug, Clone)]
pub struct SnapshotBroadcaster {
    interval: Duration,
    last_sent: Option<Instant>,
    sent: u64,
}

impl SnapshotBroadcaster {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            sent: 0,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Builds and sends a snapshot if the interval has elapsed. Returns
    /// whether one was sent.
    pub fn tick<S, F>(&mut self, now: Instant, sink: &S, snapshot: F) -> bool
    where
        S: MessageSink + ?Sized,
        F: FnOnce() -> Snapshot,
    {
        if !self.is_due(now) {
            return false;
        }
        self.last_sent = Some(now);

        let message = Message::GameStateUpdate { data: snapshot() };
        if !sink.send_message(&message) {
            log::trace!("Snapshot send failed");
        }
        self.sent += 1;
        true
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
