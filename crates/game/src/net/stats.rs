use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent: loss_percent.clamp(0.0, 100.0),
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() * 100.0 < self.loss_percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
}

/// Counters shared between an owner and its network threads.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    rtt_micros: AtomicU64,
}

impl StatsCounters {
    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rtt(&self, rtt: std::time::Duration) {
        self.rtt_micros
            .store(rtt.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetworkStats {
        NetworkStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            rtt_ms: self.rtt_micros.load(Ordering::Relaxed) as f32 / 1000.0,
        }
    }
}

pub fn rand_percent() -> f32 {
    (rand_u64() >> 40) as f32 / (1u64 << 24) as f32
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::Instant;

    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let mut hasher = DefaultHasher::new();
    Instant::now().hash(&mut hasher);
    SEQUENCE.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    hasher.finish()
}
