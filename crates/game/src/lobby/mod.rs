use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use crate::net::{
    CodeError, Endpoint, EndpointConfig, EndpointEvent, HOST_PLAYER_ID, InputAction, Message,
    NetError, NetworkStats, PlayerId, PlayerInput, Relay, RelayConfig, RelayEvent, SessionCode,
    SessionRegistry, registry,
};

pub const COUNTDOWN_DURATION: Duration = Duration::from_secs(3);
pub const READY_CHECK_WINDOW: Duration = Duration::from_secs(1);

pub const MSG_CHECKING: &str = "Checking client connection...";
pub const MSG_CANNOT_START: &str = "Connection lost - cannot start game";
pub const MSG_NOT_RESPONDING: &str = "Client not responding - check connection";
pub const MSG_CONNECT_FAILED: &str = "Failed to connect to server";
pub const MSG_HOST_CONNECT_FAILED: &str = "Failed to connect host to server";
pub const MSG_HOST_DISCONNECTED: &str = "Host disconnected";
pub const MSG_CLIENT_LOST: &str = "Connection to server lost";
pub const MSG_HOST_LOST: &str = "Server connection lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobbyState {
    Main,
    HostWaiting,
    JoinInput,
    Connecting,
    Countdown,
    ClientWaiting,
    Playing,
}

impl LobbyState {
    pub fn as_str(self) -> &'static str {
        match self {
            LobbyState::Main => "main",
            LobbyState::HostWaiting => "host_waiting",
            LobbyState::JoinInput => "join_input",
            LobbyState::Connecting => "connecting",
            LobbyState::Countdown => "countdown",
            LobbyState::ClientWaiting => "client_waiting",
            LobbyState::Playing => "playing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Joiner,
}

impl Role {
    fn waiting_state(self) -> LobbyState {
        match self {
            Role::Host => LobbyState::HostWaiting,
            Role::Joiner => LobbyState::ClientWaiting,
        }
    }
}

/// Lifecycle notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    Hosted { code: SessionCode },
    Connected { player_id: Option<PlayerId> },
    ParticipantJoined { player_id: PlayerId },
    ParticipantLeft { player_id: PlayerId },
    SessionReady,
    CountdownStarted { duration: Duration },
    CountdownCancelled,
    GameStarted { role: Role },
    ReturnedToLobby,
    ReturnedToMainMenu,
    ConnectionLost { message: String },
}

#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub countdown: Duration,
    pub ready_window: Duration,
    pub relay: RelayConfig,
    pub endpoint: EndpointConfig,
    pub registry: Option<Arc<SessionRegistry>>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            countdown: COUNTDOWN_DURATION,
            ready_window: READY_CHECK_WINDOW,
            relay: RelayConfig::default(),
            endpoint: EndpointConfig::default(),
            registry: None,
        }
    }
}

/// A join handshake running on the `lobby-connect` thread.
struct PendingConnect {
    result: Receiver<Result<Endpoint, NetError>>,
    cancel: Arc<AtomicBool>,
}

impl PendingConnect {
    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Session lifecycle from the main menu to active play. Driven by the game
/// loop through `update`; never blocks except for the host's own loopback
/// connect.
pub struct LobbySession {
    config: LobbyConfig,
    state: LobbyState,
    role: Option<Role>,
    error: Option<String>,
    relay: Option<Relay>,
    endpoint: Option<Endpoint>,
    pending: Option<PendingConnect>,
    join_code: Option<SessionCode>,
    ready_check: Option<Instant>,
    countdown: Option<(Instant, Duration)>,
    events: VecDeque<LobbyEvent>,
}

impl LobbySession {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            state: LobbyState::Main,
            role: None,
            error: None,
            relay: None,
            endpoint: None,
            pending: None,
            join_code: None,
            ready_check: None,
            countdown: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn relay(&self) -> Option<&Relay> {
        self.relay.as_ref()
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.endpoint.as_ref().and_then(Endpoint::player_id)
    }

    pub fn code(&self) -> Option<SessionCode> {
        match (&self.relay, &self.endpoint) {
            (Some(relay), _) => Some(relay.code().clone()),
            (None, Some(endpoint)) => endpoint.server_code(),
            (None, None) => self.join_code.clone(),
        }
    }

    pub fn participant_count(&self) -> usize {
        self.relay.as_ref().map_or(0, Relay::participant_count)
    }

    pub fn is_ready_check_pending(&self) -> bool {
        self.ready_check.is_some()
    }

    pub fn countdown_remaining(&self, now: Instant) -> Option<Duration> {
        let (start, duration) = self.countdown?;
        Some(duration.saturating_sub(now.saturating_duration_since(start)))
    }

    pub fn network_stats(&self) -> Option<NetworkStats> {
        self.endpoint.as_ref().map(Endpoint::stats)
    }

    /// Starts a relay and joins it over loopback as player 0.
    pub fn host(&mut self) {
        if self.state != LobbyState::Main {
            return;
        }
        self.error = None;

        let relay = match Relay::start(self.config.relay.clone()) {
            Ok(relay) => relay,
            Err(e) => {
                log::error!("Failed to start relay: {}", e);
                self.error = Some(format!("Failed to start server: {}", e));
                return;
            }
        };

        let reachable = relay.reachable_address();
        if let Some(registry) = &self.config.registry {
            if let Err(e) = registry.register(relay.code(), &reachable) {
                log::warn!("Could not register session {}: {}", relay.code(), e);
            }
        }

        let endpoint = match Endpoint::connect(&reachable, self.config.endpoint.clone()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                log::error!("Host could not join its own relay: {}", e);
                self.unregister(relay.code());
                self.error = Some(MSG_HOST_CONNECT_FAILED.to_string());
                return;
            }
        };
        endpoint.set_timeout_checking(false);

        let code = relay.code().clone();
        log::info!("Hosting session {}", code);
        self.relay = Some(relay);
        self.endpoint = Some(endpoint);
        self.role = Some(Role::Host);
        self.transition(LobbyState::HostWaiting);
        self.events.push_back(LobbyEvent::Hosted { code });
    }

    pub fn begin_join(&mut self) {
        if self.state != LobbyState::Main {
            return;
        }
        self.error = None;
        self.transition(LobbyState::JoinInput);
    }

    /// Resolves the code (registry first) and connects in the background.
    pub fn submit_code(&mut self, input: &str) {
        if self.state != LobbyState::JoinInput {
            return;
        }

        let code = match SessionCode::parse(input) {
            Ok(code) => code,
            Err(CodeError::Length(_)) => {
                self.error = Some("Code must be 4-6 characters".to_string());
                return;
            }
            Err(CodeError::InvalidChar(_)) => {
                self.error = Some(not_found(input.trim()));
                return;
            }
        };

        let Some(address) = registry::resolve(code.as_str(), self.config.registry.as_deref())
        else {
            self.error = Some(not_found(code.as_str()));
            return;
        };

        log::info!("Joining {} at {}", code, address);
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let config = self.config.endpoint.clone();
        let worker_cancel = Arc::clone(&cancel);
        let spawned = thread::Builder::new()
            .name("lobby-connect".into())
            .spawn(move || {
                let result = Endpoint::connect_cancellable(&address, config, &worker_cancel);
                if worker_cancel.load(Ordering::SeqCst) {
                    // Welcomed just as the join was abandoned.
                    if let Ok(endpoint) = result {
                        endpoint.disconnect();
                    }
                    return;
                }
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            log::error!("Could not spawn connect thread: {}", e);
            self.error = Some(MSG_CONNECT_FAILED.to_string());
            return;
        }

        self.error = None;
        self.join_code = Some(code);
        self.pending = Some(PendingConnect { result: rx, cancel });
        self.transition(LobbyState::Connecting);
    }

    /// Host only: confirm the joiner is live before starting the countdown.
    pub fn start_ready_check(&mut self, now: Instant) {
        if self.state != LobbyState::HostWaiting || self.ready_check.is_some() {
            return;
        }
        if self.participant_count() < 2 {
            return;
        }

        let healthy = self.endpoint.as_ref().is_some_and(Endpoint::is_healthy);
        if !healthy {
            self.error = Some(MSG_CANNOT_START.to_string());
            return;
        }

        if self.send(&Message::ReadyPing) {
            log::info!("Sending ready check");
            self.ready_check = Some(now);
            self.error = Some(MSG_CHECKING.to_string());
        } else {
            self.error = Some(MSG_CANNOT_START.to_string());
        }
    }

    /// Backs out one step: a countdown returns to waiting, everything else
    /// tears the session down.
    pub fn cancel(&mut self) {
        match self.state {
            LobbyState::Main => {}
            LobbyState::Countdown => {
                self.send(&Message::CountdownCancel);
                self.leave_countdown();
            }
            LobbyState::Playing => self.quit_to_main(),
            LobbyState::JoinInput
            | LobbyState::Connecting
            | LobbyState::HostWaiting
            | LobbyState::ClientWaiting => {
                self.teardown();
                self.error = None;
            }
        }
    }

    /// From active play back to the waiting room, keeping the session.
    pub fn return_to_lobby(&mut self) {
        if self.state != LobbyState::Playing {
            return;
        }
        let Some(role) = self.role else {
            return;
        };
        if role == Role::Host {
            self.send(&Message::ReturnToLobby);
        }
        self.enter_waiting(role);
        self.events.push_back(LobbyEvent::ReturnedToLobby);
    }

    /// Leaves the session entirely. The host tells the joiner to follow; the
    /// joiner asks the host to.
    pub fn quit_to_main(&mut self) {
        match self.role {
            Some(Role::Host) => {
                self.send(&Message::ReturnToMainMenu);
            }
            Some(Role::Joiner) => {
                if let Some(player_id) = self.player_id() {
                    self.send(&Message::PlayerInput {
                        data: PlayerInput::new(InputAction::QuitToMenu, player_id),
                    });
                }
            }
            None => {}
        }
        if self.state != LobbyState::Main {
            self.teardown();
            self.events.push_back(LobbyEvent::ReturnedToMainMenu);
        }
    }

    /// Called once per frame. Returns the lifecycle events produced since the
    /// last call.
    pub fn update(&mut self, now: Instant) -> Vec<LobbyEvent> {
        self.poll_pending();
        self.poll_relay();
        self.poll_endpoint(now);

        if self.state == LobbyState::HostWaiting {
            if let Some(started) = self.ready_check {
                if now.saturating_duration_since(started) > self.config.ready_window {
                    log::warn!("Ready check timed out");
                    self.ready_check = None;
                    self.error = Some(MSG_NOT_RESPONDING.to_string());
                }
            }
        }

        if self.state == LobbyState::Countdown && self.countdown_remaining(now) == Some(Duration::ZERO)
        {
            if let Some(endpoint) = &self.endpoint {
                endpoint.set_timeout_checking(true);
            }
            self.countdown = None;
            self.transition(LobbyState::Playing);
            if let Some(role) = self.role {
                self.events.push_back(LobbyEvent::GameStarted { role });
            }
        }

        self.events.drain(..).collect()
    }

    fn poll_pending(&mut self) {
        let Some(pending) = &self.pending else {
            return;
        };
        let result = match pending.result.try_recv() {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err("connect thread exited".to_string()),
        };
        self.pending = None;

        match result {
            Ok(endpoint) => {
                endpoint.set_timeout_checking(false);
                let player_id = endpoint.player_id();
                self.endpoint = Some(endpoint);
                self.role = Some(Role::Joiner);
                self.transition(LobbyState::ClientWaiting);
                self.events.push_back(LobbyEvent::Connected { player_id });
            }
            Err(reason) => {
                log::warn!("Join failed: {}", reason);
                self.error = Some(MSG_CONNECT_FAILED.to_string());
                self.join_code = None;
                self.transition(LobbyState::JoinInput);
            }
        }
    }

    fn poll_relay(&mut self) {
        let Some(relay) = &self.relay else {
            return;
        };
        for event in relay.drain_events() {
            match event {
                RelayEvent::ParticipantJoined { player_id, .. } => {
                    self.events.push_back(LobbyEvent::ParticipantJoined { player_id });
                }
                RelayEvent::ParticipantLeft { player_id, .. } => {
                    log::info!("Player {} left the session", player_id);
                }
                RelayEvent::SessionReady => {}
            }
        }
    }

    fn poll_endpoint(&mut self, now: Instant) {
        let events = match &self.endpoint {
            Some(endpoint) => {
                endpoint.check_timeout();
                endpoint.drain_events()
            }
            None => return,
        };

        for event in events {
            match event {
                EndpointEvent::ConnectionLost(reason) => {
                    log::warn!("Lobby lost its connection: {}", reason.as_str());
                    self.connection_lost();
                    return;
                }
                EndpointEvent::Message(message) => self.handle_message(message, now),
            }
            if self.endpoint.is_none() {
                return;
            }
        }
    }

    fn handle_message(&mut self, message: Message, now: Instant) {
        let role = self.role;
        match message {
            Message::GameStart => self.events.push_back(LobbyEvent::SessionReady),
            Message::ReadyPing => {
                if role == Some(Role::Joiner) {
                    self.send(&Message::ReadyPong);
                }
            }
            Message::ReadyPong => {
                if role == Some(Role::Host) && self.state == LobbyState::HostWaiting {
                    if let Some(started) = self.ready_check.take() {
                        if now.saturating_duration_since(started) <= self.config.ready_window {
                            self.start_countdown(now);
                        }
                    }
                }
            }
            Message::CountdownStart { duration } => {
                if role == Some(Role::Joiner) && self.state == LobbyState::ClientWaiting {
                    let duration = if duration.is_finite() && duration >= 0.0 {
                        Duration::from_secs_f64(duration)
                    } else {
                        self.config.countdown
                    };
                    self.countdown = Some((now, duration));
                    self.transition(LobbyState::Countdown);
                    self.events
                        .push_back(LobbyEvent::CountdownStarted { duration });
                }
            }
            Message::CountdownCancel => {
                if self.state == LobbyState::Countdown {
                    self.leave_countdown();
                }
            }
            Message::PlayerDisconnected { player_id, .. } => self.player_left(player_id),
            Message::ReturnToLobby => {
                if role == Some(Role::Joiner)
                    && matches!(self.state, LobbyState::Playing | LobbyState::Countdown)
                {
                    self.enter_waiting(Role::Joiner);
                    self.events.push_back(LobbyEvent::ReturnedToLobby);
                }
            }
            Message::ReturnToMainMenu => {
                if role == Some(Role::Joiner) {
                    self.teardown();
                    self.events.push_back(LobbyEvent::ReturnedToMainMenu);
                }
            }
            Message::PlayerInput { data } => {
                if role == Some(Role::Host)
                    && data.action == InputAction::QuitToMenu
                    && Some(data.player_id) != self.player_id()
                {
                    self.quit_to_main();
                }
            }
            other => log::trace!("Lobby ignoring {:?}", other.kind()),
        }
    }

    fn start_countdown(&mut self, now: Instant) {
        let duration = self.config.countdown;
        self.error = None;
        self.send(&Message::CountdownStart {
            duration: duration.as_secs_f64(),
        });
        self.countdown = Some((now, duration));
        self.transition(LobbyState::Countdown);
        self.events
            .push_back(LobbyEvent::CountdownStarted { duration });
    }

    fn leave_countdown(&mut self) {
        if let Some(role) = self.role {
            self.enter_waiting(role);
            self.events.push_back(LobbyEvent::CountdownCancelled);
        }
    }

    fn enter_waiting(&mut self, role: Role) {
        if let Some(endpoint) = &self.endpoint {
            endpoint.set_timeout_checking(false);
        }
        self.countdown = None;
        self.ready_check = None;
        self.transition(role.waiting_state());
    }

    fn player_left(&mut self, player_id: PlayerId) {
        match self.role {
            Some(Role::Joiner) if player_id == HOST_PLAYER_ID => {
                self.teardown();
                self.error = Some(MSG_HOST_DISCONNECTED.to_string());
                self.events.push_back(LobbyEvent::ReturnedToMainMenu);
            }
            Some(Role::Host) if Some(player_id) != self.player_id() => {
                self.events
                    .push_back(LobbyEvent::ParticipantLeft { player_id });
                if matches!(self.state, LobbyState::Countdown | LobbyState::Playing) {
                    self.enter_waiting(Role::Host);
                }
            }
            _ => {}
        }
    }

    fn connection_lost(&mut self) {
        let message = match self.role {
            Some(Role::Host) => MSG_HOST_LOST,
            _ => MSG_CLIENT_LOST,
        };
        self.teardown();
        self.error = Some(message.to_string());
        self.events.push_back(LobbyEvent::ConnectionLost {
            message: message.to_string(),
        });
    }

    fn send(&self, message: &Message) -> bool {
        self.endpoint
            .as_ref()
            .is_some_and(|endpoint| endpoint.send(message))
    }

    fn unregister(&self, code: &SessionCode) {
        if let Some(registry) = &self.config.registry {
            if let Err(e) = registry.remove(code) {
                log::debug!("Could not unregister {}: {}", code, e);
            }
        }
    }

    /// Drops every network resource and returns to the main menu.
    fn teardown(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.disconnect();
        }
        if let Some(mut relay) = self.relay.take() {
            self.unregister(relay.code());
            relay.stop();
        }
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
        self.join_code = None;
        self.ready_check = None;
        self.countdown = None;
        self.role = None;
        self.transition(LobbyState::Main);
    }

    fn transition(&mut self, next: LobbyState) {
        if self.state != next {
            log::info!("Lobby {} -> {}", self.state.as_str(), next.as_str());
            self.state = next;
        }
    }
}

impl Drop for LobbySession {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn not_found(code: &str) -> String {
    format!("Server with code '{}' not found", code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_input_round_trip() {
        let mut lobby = LobbySession::new(LobbyConfig::default());
        lobby.begin_join();
        assert_eq!(lobby.state(), LobbyState::JoinInput);

        lobby.cancel();
        assert_eq!(lobby.state(), LobbyState::Main);
        assert_eq!(lobby.error(), None);
    }

    #[test]
    fn test_bad_codes_stay_in_join_input() {
        let mut lobby = LobbySession::new(LobbyConfig::default());
        lobby.begin_join();

        lobby.submit_code("AB");
        assert_eq!(lobby.state(), LobbyState::JoinInput);
        assert_eq!(lobby.error(), Some("Code must be 4-6 characters"));

        lobby.submit_code("AB-12C");
        assert_eq!(lobby.state(), LobbyState::JoinInput);
        assert_eq!(lobby.error(), Some("Server with code 'AB-12C' not found"));
    }

    #[test]
    fn test_operations_ignored_in_wrong_state() {
        let mut lobby = LobbySession::new(LobbyConfig::default());
        lobby.submit_code("LOCALL");
        lobby.start_ready_check(Instant::now());
        lobby.return_to_lobby();
        lobby.cancel();

        assert_eq!(lobby.state(), LobbyState::Main);
        assert!(lobby.update(Instant::now()).is_empty());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(LobbyState::HostWaiting.as_str(), "host_waiting");
        assert_eq!(LobbyState::ClientWaiting.as_str(), "client_waiting");
        assert_eq!(Role::Joiner.waiting_state(), LobbyState::ClientWaiting);
    }
}
