use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::lock;

use super::address::{Address, same_peer};
use super::code::SessionCode;
use super::error::NetError;
use super::health::{HealthMonitor, PING_INTERVAL, PONG_TIMEOUT};
use super::protocol::{MAX_DATAGRAM_SIZE, MTU_WARN_SIZE, Message, MessageKind, PlayerId};
use super::stats::{NetworkStats, StatsCounters};
use super::{IDLE_SLICE, idle, is_timeout};

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub poll_interval: Duration,
    pub keepalive_tick: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
            poll_interval: Duration::from_secs(1),
            keepalive_tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostReason {
    Timeout,
    PingFailed,
    SocketError(String),
}

impl LostReason {
    pub fn as_str(&self) -> &str {
        match self {
            LostReason::Timeout => "timed out",
            LostReason::PingFailed => "ping failed",
            LostReason::SocketError(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    Message(Message),
    ConnectionLost(LostReason),
}

pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug)]
struct Session {
    state: ConnectionState,
    player_id: Option<PlayerId>,
    server_code: Option<SessionCode>,
}

struct EndpointShared {
    socket: UdpSocket,
    server: SocketAddr,
    config: EndpointConfig,
    running: AtomicBool,
    session: Mutex<Session>,
    welcomed: Condvar,
    health: Mutex<HealthMonitor>,
    handlers: Mutex<HashMap<MessageKind, Handler>>,
    inbox: Mutex<VecDeque<EndpointEvent>>,
    stats: StatsCounters,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Client side of a session: one socket talking to one relay.
pub struct Endpoint {
    shared: Arc<EndpointShared>,
}

impl Endpoint {
    pub fn connect(address: &Address, config: EndpointConfig) -> Result<Self, NetError> {
        Self::connect_cancellable(address, config, &AtomicBool::new(false))
    }

    /// Like `connect`, but stops re-sending `connect` and gives up as soon as
    /// `cancel` is set.
    pub fn connect_cancellable(
        address: &Address,
        config: EndpointConfig,
        cancel: &AtomicBool,
    ) -> Result<Self, NetError> {
        let server = address
            .to_socket_addr()
            .map_err(|source| NetError::Resolve {
                address: address.to_string(),
                source,
            })?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        log::info!(
            "Endpoint bound to {}, connecting to {}",
            socket.local_addr()?,
            server
        );

        let health = HealthMonitor::new(config.ping_interval, config.pong_timeout);
        let shared = Arc::new(EndpointShared {
            socket,
            server,
            config,
            running: AtomicBool::new(true),
            session: Mutex::new(Session {
                state: ConnectionState::Connecting,
                player_id: None,
                server_code: None,
            }),
            welcomed: Condvar::new(),
            health: Mutex::new(health),
            handlers: Mutex::new(HashMap::new()),
            inbox: Mutex::new(VecDeque::new()),
            stats: StatsCounters::default(),
            threads: Mutex::new(Vec::new()),
        });

        let receiver = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("endpoint-recv".into())
                .spawn(move || shared.receive_loop())?
        };
        lock(&shared.threads).push(receiver);

        let endpoint = Self { shared };
        let state = endpoint.await_welcome(cancel);
        if cancel.load(Ordering::SeqCst) {
            log::info!("Handshake with {} cancelled", server);
            endpoint.shutdown();
            return Err(NetError::HandshakeCancelled(server));
        }
        match state {
            ConnectionState::Connected => {}
            ConnectionState::Lost => {
                endpoint.shutdown();
                return Err(NetError::HandshakeAborted(server));
            }
            _ => {
                log::warn!("No welcome from {}", server);
                endpoint.shutdown();
                return Err(NetError::HandshakeTimeout(
                    server,
                    endpoint.shared.config.handshake_timeout,
                ));
            }
        }

        let keepalive = {
            let shared = Arc::clone(&endpoint.shared);
            thread::Builder::new()
                .name("endpoint-keepalive".into())
                .spawn(move || shared.keepalive_loop())?
        };
        lock(&endpoint.shared.threads).push(keepalive);

        log::info!(
            "Connected to {} as player {:?}",
            server,
            endpoint.player_id()
        );
        Ok(endpoint)
    }

    /// Re-sends `connect` once per poll slice until welcomed, cancelled or the
    /// handshake window closes.
    fn await_welcome(&self, cancel: &AtomicBool) -> ConnectionState {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.handshake_timeout;
        let mut session = lock(&shared.session);

        loop {
            if session.state != ConnectionState::Connecting || cancel.load(Ordering::SeqCst) {
                return session.state;
            }
            let now = Instant::now();
            if now >= deadline {
                return session.state;
            }

            drop(session);
            shared.send(&Message::Connect);
            session = lock(&shared.session);

            let slice = shared.config.poll_interval.min(deadline - now);
            let slice_end = now + slice;
            while session.state == ConnectionState::Connecting && !cancel.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= slice_end {
                    break;
                }
                session = shared
                    .welcomed
                    .wait_timeout(session, (slice_end - now).min(IDLE_SLICE))
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0);
            }
        }
    }

    pub fn send(&self, message: &Message) -> bool {
        self.shared.send(message)
    }

    /// Handlers run on the receive thread. Messages with a handler never reach
    /// the inbox.
    pub fn register_handler<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        lock(&self.shared.handlers).insert(kind, Arc::new(handler));
    }

    pub fn unregister_handler(&self, kind: MessageKind) {
        lock(&self.shared.handlers).remove(&kind);
    }

    pub fn poll_event(&self) -> Option<EndpointEvent> {
        lock(&self.shared.inbox).pop_front()
    }

    pub fn drain_events(&self) -> Vec<EndpointEvent> {
        lock(&self.shared.inbox).drain(..).collect()
    }

    pub fn disconnect(&self) {
        if self.shared.running.load(Ordering::SeqCst) {
            log::info!("Disconnecting from {}", self.shared.server);
        }
        self.shutdown();
    }

    fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        {
            let mut session = lock(&self.shared.session);
            if session.state != ConnectionState::Lost {
                session.state = ConnectionState::Disconnected;
            }
        }
        self.shared.welcomed.notify_all();

        let handles: Vec<_> = lock(&self.shared.threads).drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.session).state
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        lock(&self.shared.session).player_id
    }

    pub fn server_code(&self) -> Option<SessionCode> {
        lock(&self.shared.session).server_code.clone()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.shared.server
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_lost(&self) -> bool {
        self.state() == ConnectionState::Lost
    }

    pub fn is_healthy(&self) -> bool {
        self.is_connected()
            && self.shared.running.load(Ordering::SeqCst)
            && lock(&self.shared.health).is_healthy(Instant::now())
    }

    /// Called once per game tick; turns staleness into a `ConnectionLost`
    /// event. No-op once lost.
    pub fn check_timeout(&self) {
        if !self.is_connected() {
            return;
        }
        let stale = lock(&self.shared.health).is_stale(Instant::now());
        if stale {
            self.shared.fire_lost(LostReason::Timeout);
        }
    }

    pub fn set_timeout_checking(&self, enabled: bool) {
        let mut health = lock(&self.shared.health);
        if enabled && !health.is_checking() {
            // Silence before checking was enabled does not count.
            health.record_alive(Instant::now());
        }
        health.set_timeout_checking(enabled);
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.stats.snapshot()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EndpointShared {
    fn send(&self, message: &Message) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let data = match message.encode() {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Failed to encode {:?}: {}", message.kind(), e);
                return false;
            }
        };
        if data.len() > MTU_WARN_SIZE {
            log::debug!("{:?} is {} bytes, above MTU", message.kind(), data.len());
        }

        match self.socket.send_to(&data, self.server) {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                log::trace!("Sent {:?} ({} bytes)", message.kind(), bytes);
                true
            }
            Err(e) => {
                log::debug!("Send to {} failed: {}", self.server, e);
                false
            }
        }
    }

    fn receive_loop(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((size, from)) => {
                    if !same_peer(&from, &self.server) {
                        log::trace!("Ignoring datagram from {}", from);
                        continue;
                    }
                    self.stats.record_received(size);

                    match Message::decode(&buf[..size]) {
                        Ok(message) => self.dispatch(message),
                        Err(e) => {
                            self.stats.record_dropped();
                            log::warn!("Dropping datagram from {}: {}", from, e);
                        }
                    }
                }
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        log::warn!("Receive error: {}", e);
                        self.fire_lost(LostReason::SocketError(e.to_string()));
                    }
                    break;
                }
            }
        }

        log::debug!("Endpoint receive loop ended");
    }

    fn keepalive_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            let due = lock(&self.health).ping_due(now);
            if due {
                if self.send(&Message::Ping) {
                    lock(&self.health).record_ping(now);
                } else if self.running.load(Ordering::SeqCst) {
                    self.fire_lost(LostReason::PingFailed);
                    break;
                }
            }

            let stale = lock(&self.health).is_stale(Instant::now());
            if stale {
                self.fire_lost(LostReason::Timeout);
                break;
            }

            idle(&self.running, self.config.keepalive_tick);
        }
    }

    fn dispatch(&self, message: Message) {
        match &message {
            Message::Welcome {
                player_id,
                server_code,
            } => {
                let mut session = lock(&self.session);
                if session.state == ConnectionState::Connecting {
                    session.state = ConnectionState::Connected;
                    session.player_id = Some(*player_id);
                    session.server_code = Some(server_code.clone());
                    lock(&self.health).record_alive(Instant::now());
                    self.welcomed.notify_all();
                }
            }
            Message::Pong => {
                let rtt = lock(&self.health).record_pong(Instant::now());
                if let Some(rtt) = rtt {
                    self.stats.record_rtt(rtt);
                }
            }
            Message::Unknown => {
                log::debug!("Ignoring message of unknown type");
                return;
            }
            _ => {}
        }

        let kind = message.kind();
        let handler = lock(&self.handlers).get(&kind).cloned();
        match (handler, kind) {
            (Some(handler), _) => handler(&message),
            (None, MessageKind::Welcome | MessageKind::Pong) => {}
            (None, _) => lock(&self.inbox).push_back(EndpointEvent::Message(message)),
        }
    }

    /// Only the first caller transitions; later calls are no-ops.
    fn fire_lost(&self, reason: LostReason) {
        if !lock(&self.health).mark_lost() {
            return;
        }
        log::warn!("Connection to {} lost: {}", self.server, reason.as_str());

        self.running.store(false, Ordering::SeqCst);
        {
            let mut session = lock(&self.session);
            if session.state != ConnectionState::Disconnected {
                session.state = ConnectionState::Lost;
            }
        }
        self.welcomed.notify_all();
        lock(&self.inbox).push_back(EndpointEvent::ConnectionLost(reason));
    }
}
