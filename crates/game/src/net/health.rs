use std::time::{Duration, Instant};

pub const PING_INTERVAL: Duration = Duration::from_secs(5);
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Liveness bookkeeping for one endpoint. Pure state; the keepalive loop and
/// the owner's tick feed it instants.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    ping_interval: Duration,
    pong_timeout: Duration,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    rtt: Option<Duration>,
    checking: bool,
    lost: bool,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(PING_INTERVAL, PONG_TIMEOUT)
    }
}

impl HealthMonitor {
    pub fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
            last_ping: None,
            last_pong: None,
            rtt: None,
            checking: false,
            lost: false,
        }
    }

    pub fn ping_due(&self, now: Instant) -> bool {
        match self.last_ping {
            Some(sent) => now.saturating_duration_since(sent) >= self.ping_interval,
            None => true,
        }
    }

    pub fn record_ping(&mut self, now: Instant) {
        self.last_ping = Some(now);
    }

    pub fn record_pong(&mut self, now: Instant) -> Option<Duration> {
        self.last_pong = Some(now);
        if let Some(sent) = self.last_ping {
            self.rtt = Some(now.saturating_duration_since(sent));
        }
        self.rtt
    }

    /// Any sign of life from the peer (the welcome) counts like a pong.
    pub fn record_alive(&mut self, now: Instant) {
        self.last_pong = Some(now);
    }

    pub fn set_timeout_checking(&mut self, enabled: bool) {
        self.checking = enabled;
    }

    pub fn is_checking(&self) -> bool {
        self.checking
    }

    /// Stale only once a pong has been seen; an endpoint that never heard a
    /// pong is not judged here.
    pub fn is_stale(&self, now: Instant) -> bool {
        if !self.checking {
            return false;
        }
        match self.last_pong {
            Some(pong) => now.saturating_duration_since(pong) > self.pong_timeout,
            None => false,
        }
    }

    pub fn is_healthy(&self, now: Instant) -> bool {
        !self.lost && !self.is_stale(now)
    }

    /// Returns true only for the call that performs the transition.
    pub fn mark_lost(&mut self) -> bool {
        !std::mem::replace(&mut self.lost, true)
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }
}
