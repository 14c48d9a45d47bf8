use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::lock;

use super::address::{Address, local_ipv4};
use super::code::{self, DEFAULT_PORT, SessionCode};
use super::connection::{Admission, LIVENESS_WINDOW, Participant, ParticipantTable};
use super::error::NetError;
use super::protocol::{
    DISCONNECT_REASON_TIMEOUT, MAX_DATAGRAM_SIZE, MAX_PLAYERS, Message, MessageKind, PlayerId,
    Route,
};
use super::stats::{NetworkStats, PacketLossSimulation, StatsCounters};
use super::{idle, is_timeout};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: IpAddr,
    /// 0 picks an ephemeral port.
    pub port: u16,
    pub capacity: usize,
    pub liveness: Duration,
    pub sweep_interval: Duration,
    pub poll_interval: Duration,
    /// Host advertised in the session code. Discovered when unset.
    pub advertise: Option<IpAddr>,
    /// Rebind to `DEFAULT_PORT` when the session code is the loopback
    /// sentinel, since that is the port the sentinel decodes to.
    pub prefer_default_port: bool,
    pub packet_loss: PacketLossSimulation,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            capacity: MAX_PLAYERS,
            liveness: LIVENESS_WINDOW,
            sweep_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            advertise: None,
            prefer_default_port: true,
            packet_loss: PacketLossSimulation::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    ParticipantJoined {
        player_id: PlayerId,
        addr: SocketAddr,
    },
    ParticipantLeft {
        player_id: PlayerId,
        addr: SocketAddr,
        reason: String,
    },
    SessionReady,
}

struct RelayShared {
    socket: UdpSocket,
    code: SessionCode,
    running: AtomicBool,
    table: Mutex<ParticipantTable>,
    events: Mutex<VecDeque<RelayEvent>>,
    stats: StatsCounters,
    packet_loss: PacketLossSimulation,
}

/// The session host: admits up to two participants and forwards their
/// datagrams according to message type.
pub struct Relay {
    shared: Arc<RelayShared>,
    local_addr: SocketAddr,
    advertised: Address,
    threads: Vec<JoinHandle<()>>,
}

impl Relay {
    pub fn start(config: RelayConfig) -> Result<Self, NetError> {
        let advertise_ip = config
            .advertise
            .or_else(|| local_ipv4().map(IpAddr::V4))
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let socket = bind_socket(&config, advertise_ip)?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        let local_addr = socket.local_addr()?;
        let code = code::encode_ip(advertise_ip, local_addr.port());
        let advertised = if code.is_loopback() {
            Address::loopback(local_addr.port())
        } else {
            Address::new(advertise_ip.to_string(), local_addr.port())
        };

        log::info!("Relay started on {} with code {}", local_addr, code);

        let shared = Arc::new(RelayShared {
            socket,
            code,
            running: AtomicBool::new(true),
            table: Mutex::new(ParticipantTable::new(config.capacity, config.liveness)),
            events: Mutex::new(VecDeque::new()),
            stats: StatsCounters::default(),
            packet_loss: config.packet_loss.clone(),
        });

        let mut threads = Vec::with_capacity(2);
        {
            let shared = Arc::clone(&shared);
            threads.push(
                thread::Builder::new()
                    .name("relay-recv".into())
                    .spawn(move || shared.receive_loop())?,
            );
        }
        {
            let shared = Arc::clone(&shared);
            let interval = config.sweep_interval;
            threads.push(
                thread::Builder::new()
                    .name("relay-sweep".into())
                    .spawn(move || shared.sweep_loop(interval))?,
            );
        }

        Ok(Self {
            shared,
            local_addr,
            advertised,
            threads,
        })
    }

    pub fn code(&self) -> &SessionCode {
        &self.shared.code
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn advertised_address(&self) -> &Address {
        &self.advertised
    }

    /// Address a process on this machine should use to reach the relay.
    pub fn reachable_address(&self) -> Address {
        if self.local_addr.ip().is_unspecified() {
            Address::loopback(self.local_addr.port())
        } else {
            Address::from(self.local_addr)
        }
    }

    pub fn participant_count(&self) -> usize {
        lock(&self.shared.table).len()
    }

    pub fn participants(&self) -> Vec<Participant> {
        let mut participants: Vec<_> = lock(&self.shared.table).iter().cloned().collect();
        participants.sort_by_key(|p| p.player_id);
        participants
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.shared.table).is_ready()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Sends an authoritative message to every participant.
    pub fn broadcast(&self, message: &Message) -> bool {
        self.shared.broadcast(message, None)
    }

    pub fn drain_events(&self) -> Vec<RelayEvent> {
        lock(&self.shared.events).drain(..).collect()
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.stats.snapshot()
    }

    pub fn stop(&mut self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            log::info!("Relay {} stopping", self.shared.code);
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        lock(&self.shared.table).clear();
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_socket(config: &RelayConfig, advertise_ip: IpAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::new(config.bind, config.port))?;
    if config.port != 0 || !config.prefer_default_port {
        return Ok(socket);
    }

    let port = socket.local_addr()?.port();
    if !code::encode_ip(advertise_ip, port).is_loopback() || port == DEFAULT_PORT {
        return Ok(socket);
    }

    match UdpSocket::bind(SocketAddr::new(config.bind, DEFAULT_PORT)) {
        Ok(preferred) => Ok(preferred),
        Err(e) => {
            log::warn!(
                "Port {} unavailable ({}), code {} will need the session registry",
                DEFAULT_PORT,
                e,
                code::LOOPBACK_CODE
            );
            Ok(socket)
        }
    }
}

impl RelayShared {
    fn receive_loop(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((size, from)) => {
                    self.stats.record_received(size);
                    self.handle_datagram(&buf[..size], from, Instant::now());
                }
                Err(e) if is_timeout(&e) => continue,
                // ICMP port-unreachable from a vanished peer surfaces here on some platforms.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    log::debug!("Relay receive: {}", e);
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        log::error!("Relay receive error: {}", e);
                    }
                    break;
                }
            }
        }

        log::debug!("Relay receive loop ended");
    }

    fn sweep_loop(&self, interval: Duration) {
        while self.running.load(Ordering::SeqCst) {
            idle(&self.running, interval);
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.sweep(Instant::now());
        }
    }

    fn sweep(&self, now: Instant) {
        let (evicted, empty) = {
            let mut table = lock(&self.table);
            let evicted = table.evict_stale(now);
            (evicted, table.is_empty())
        };
        if empty && !evicted.is_empty() {
            log::info!("Session {} has no participants left", self.code);
        }
        for participant in evicted {
            log::info!(
                "Player {} at {} timed out",
                participant.player_id,
                participant.addr
            );
            self.push_event(RelayEvent::ParticipantLeft {
                player_id: participant.player_id,
                addr: participant.addr,
                reason: DISCONNECT_REASON_TIMEOUT.to_string(),
            });
            self.broadcast(
                &Message::PlayerDisconnected {
                    player_id: participant.player_id,
                    reason: DISCONNECT_REASON_TIMEOUT.to_string(),
                },
                None,
            );
        }
    }

    fn handle_datagram(&self, data: &[u8], from: SocketAddr, now: Instant) {
        let kind = match MessageKind::peek(data) {
            Ok(kind) => kind,
            Err(e) => {
                self.stats.record_dropped();
                log::warn!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        if kind == MessageKind::Connect {
            self.handle_connect(from, now);
            return;
        }

        let Some(sender) = lock(&self.table).touch(&from, now) else {
            log::trace!("Ignoring {:?} from unregistered {}", kind, from);
            return;
        };

        match kind.route() {
            Route::Broadcast => self.forward(data, None),
            Route::Others => self.forward(data, Some(sender)),
            Route::Reply => {
                self.send_message(&Message::Pong, from);
            }
            Route::Drop => log::debug!("Not relaying {:?} from player {}", kind, sender),
        }
    }

    fn handle_connect(&self, from: SocketAddr, now: Instant) {
        let admission = lock(&self.table).admit(from, now);
        match admission {
            Admission::Welcomed { player_id, ready } => {
                log::info!("Player {} connected from {}", player_id, from);
                self.push_event(RelayEvent::ParticipantJoined {
                    player_id,
                    addr: from,
                });
                self.send_welcome(player_id, from);

                if ready {
                    log::info!("Session {} ready", self.code);
                    self.push_event(RelayEvent::SessionReady);
                    self.broadcast(&Message::GameStart, None);
                }
            }
            Admission::Known(player_id) => {
                log::debug!("Re-welcoming player {} at {}", player_id, from);
                self.send_welcome(player_id, from);
            }
            Admission::Full => {
                log::debug!("Session full, ignoring connect from {}", from);
            }
        }
    }

    fn send_welcome(&self, player_id: PlayerId, to: SocketAddr) {
        let welcome = Message::Welcome {
            player_id,
            server_code: self.code.clone(),
        };
        self.send_message(&welcome, to);
    }

    fn broadcast(&self, message: &Message, except: Option<PlayerId>) -> bool {
        match message.encode() {
            Ok(data) => {
                self.forward(&data, except);
                true
            }
            Err(e) => {
                log::warn!("Failed to encode {:?}: {}", message.kind(), e);
                false
            }
        }
    }

    /// Relayed datagrams go out byte-for-byte.
    fn forward(&self, data: &[u8], except: Option<PlayerId>) {
        let targets: Vec<SocketAddr> = lock(&self.table)
            .iter()
            .filter(|p| Some(p.player_id) != except)
            .map(|p| p.addr)
            .collect();

        for addr in targets {
            self.send_raw(data, addr);
        }
    }

    fn send_message(&self, message: &Message, to: SocketAddr) -> bool {
        match message.encode() {
            Ok(data) => self.send_raw(&data, to),
            Err(e) => {
                log::warn!("Failed to encode {:?}: {}", message.kind(), e);
                false
            }
        }
    }

    fn send_raw(&self, data: &[u8], to: SocketAddr) -> bool {
        if self.packet_loss.should_drop() {
            self.stats.record_dropped();
            log::trace!("Simulated loss of {} bytes to {}", data.len(), to);
            return true;
        }

        match self.socket.send_to(data, to) {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                true
            }
            Err(e) => {
                log::warn!("Error sending to {}: {}", to, e);
                false
            }
        }
    }

    fn push_event(&self, event: RelayEvent) {
        lock(&self.events).push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> RelayConfig {
        RelayConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            advertise: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            prefer_default_port: false,
            poll_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[test]
    fn test_loopback_relay_uses_sentinel_code() {
        let relay = Relay::start(loopback_config()).unwrap();
        assert!(relay.code().is_loopback());
        assert_eq!(relay.reachable_address(), Address::from(relay.local_addr()));
        assert_eq!(relay.participant_count(), 0);
    }

    #[test]
    fn test_lan_relay_advertises_derived_code() {
        let relay = Relay::start(RelayConfig {
            advertise: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))),
            ..loopback_config()
        })
        .unwrap();

        let decoded = code::decode(relay.code().as_str()).unwrap();
        assert_eq!(decoded, *relay.advertised_address());
        assert_eq!(decoded.port, relay.local_addr().port());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut relay = Relay::start(loopback_config()).unwrap();
        relay.stop();
        relay.stop();
        assert!(!relay.is_running());
        assert_eq!(relay.participant_count(), 0);
    }
}
