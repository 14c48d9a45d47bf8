use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use duel::lobby::COUNTDOWN_DURATION;
use duel::{LobbyConfig, PacketLossSimulation, RelayConfig, SessionRegistry, SyncConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub frame_rate: u32,
    pub countdown: Duration,
    pub bind: IpAddr,
    pub port: u16,
    pub advertise: Option<IpAddr>,
    /// `None` keeps the registry in memory, so only codes this process
    /// hosted resolve through it.
    pub registry_path: Option<PathBuf>,
    pub packet_loss: Option<PacketLossSimulation>,
    pub sync: SyncConfig,
    /// Headless hosts retry an unanswered ready check after this long.
    pub ready_retry: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            countdown: COUNTDOWN_DURATION,
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 0,
            advertise: None,
            registry_path: Some(SessionRegistry::default_path()),
            packet_loss: None,
            sync: SyncConfig::default(),
            ready_retry: Duration::from_secs(2),
        }
    }
}

impl AppConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }

    pub fn lobby_config(&self) -> LobbyConfig {
        let registry = match &self.registry_path {
            Some(path) => SessionRegistry::at_path(path.clone()),
            None => SessionRegistry::in_memory(),
        };

        LobbyConfig {
            countdown: self.countdown,
            relay: RelayConfig {
                bind: self.bind,
                port: self.port,
                advertise: self.advertise,
                packet_loss: self.packet_loss.clone().unwrap_or_default(),
                ..Default::default()
            },
            registry: Some(Arc::new(registry)),
            ..Default::default()
        }
    }
}
