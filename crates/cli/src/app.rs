use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use glam::Vec2;

use duel::snapshot::{MATCH_DURATION, angle_from_direction};
use duel::sync;
use duel::{
    GameStatus, GameWorld, HOST_SLOT, HostCommand, HostSync, InputAction, JOINER_SLOT,
    LobbyConfig, LobbyEvent, LobbySession, LobbyState, NetworkStats, PlayerId, PlayerInput,
    Replica, Role, SessionCode, lock,
};

use crate::config::AppConfig;

const ARENA: Vec2 = Vec2::new(800.0, 600.0);
const SPAWNS: [Vec2; 2] = [Vec2::new(100.0, 300.0), Vec2::new(700.0, 300.0)];
const MOVE_STEP: f32 = 5.0;
const PROJECTILE_SPEED: f32 = 400.0;

enum Match {
    Host {
        sync: HostSync,
        last_step: Instant,
    },
    Joiner {
        replica: Replica,
    },
}

#[derive(Debug, Clone)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub health: i32,
    pub score: u32,
    pub is_alive: bool,
    pub position: Vec2,
}

#[derive(Debug, Clone)]
pub struct MatchSummary {
    pub status: GameStatus,
    pub winner: Option<PlayerId>,
    pub timer_remaining: Duration,
    pub players: Vec<PlayerSummary>,
    pub projectiles: usize,
}

/// Everything the front end draws for one frame.
#[derive(Debug, Clone)]
pub struct AppView {
    pub state: LobbyState,
    pub role: Option<Role>,
    pub code: Option<SessionCode>,
    pub error: Option<String>,
    pub player_id: Option<PlayerId>,
    pub participants: usize,
    pub countdown: Option<Duration>,
    pub countdown_total: Duration,
    pub network: NetworkStats,
    pub uptime_secs: u64,
    pub game: Option<MatchSummary>,
}

/// Drives the lobby and, once playing, the host's world or the joiner's
/// replica.
pub struct App {
    config: AppConfig,
    lobby: LobbySession,
    game: Option<Match>,
    started: Instant,
    last_ready_attempt: Option<Instant>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let lobby_config = config.lobby_config();
        Self::with_lobby(config, lobby_config)
    }

    pub fn with_lobby(config: AppConfig, lobby_config: LobbyConfig) -> Self {
        Self {
            config,
            lobby: LobbySession::new(lobby_config),
            game: None,
            started: Instant::now(),
            last_ready_attempt: None,
        }
    }

    pub fn lobby(&self) -> &LobbySession {
        &self.lobby
    }

    pub fn lobby_mut(&mut self) -> &mut LobbySession {
        &mut self.lobby
    }

    pub fn tick(&mut self, now: Instant) -> Vec<LobbyEvent> {
        let events = self.lobby.update(now);
        for event in &events {
            if let LobbyEvent::GameStarted { role } = event {
                self.start_match(*role, now);
            }
        }

        if self.lobby.state() != LobbyState::Playing {
            self.end_match();
        } else {
            self.step_match(now);
        }
        events
    }

    /// Headless hosts start the ready check on their own.
    pub fn auto_ready(&mut self, now: Instant) {
        if self.lobby.state() != LobbyState::HostWaiting
            || self.lobby.participant_count() < 2
            || self.lobby.is_ready_check_pending()
        {
            return;
        }
        let due = self
            .last_ready_attempt
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.ready_retry);
        if due {
            self.last_ready_attempt = Some(now);
            self.lobby.start_ready_check(now);
        }
    }

    pub fn move_local(&mut self, dx: f32, dy: f32) {
        self.local_input(PlayerInput::directional(InputAction::Move, 0, dx, dy));
    }

    pub fn aim_local(&mut self, dx: f32, dy: f32) {
        self.local_input(PlayerInput::directional(InputAction::Rotate, 0, dx, dy));
    }

    pub fn shoot_local(&mut self) {
        self.local_input(PlayerInput::new(InputAction::Shoot, 0));
    }

    pub fn toggle_pause(&mut self) {
        self.local_input(PlayerInput::new(InputAction::Pause, 0));
    }

    pub fn restart(&mut self, now: Instant) {
        match &self.game {
            Some(Match::Host { sync, .. }) => {
                let mut world = lock(sync.world());
                if world.status() == GameStatus::GameOver {
                    world.reset(now);
                }
            }
            Some(Match::Joiner { .. }) => {
                if let Some(endpoint) = self.lobby.endpoint() {
                    sync::request_restart(endpoint);
                }
            }
            None => {}
        }
    }

    /// The host applies its own input to its slot; the joiner sends it to
    /// the host as `player_input`, stamped with its relay identity.
    fn local_input(&mut self, mut input: PlayerInput) {
        match &self.game {
            Some(Match::Host { sync, .. }) => {
                let mut world = lock(sync.world());
                if let Some(command) = sync::handle_input(&mut world, &input, HOST_SLOT) {
                    apply_command(&mut world, command, Instant::now());
                }
            }
            Some(Match::Joiner { .. }) => {
                let Some(endpoint) = self.lobby.endpoint() else {
                    return;
                };
                let Some(player_id) = endpoint.player_id() else {
                    return;
                };
                input.player_id = player_id;
                sync::send_input(endpoint, input);
            }
            None => {}
        }
    }

    fn start_match(&mut self, role: Role, now: Instant) {
        let Some(endpoint) = self.lobby.endpoint() else {
            return;
        };

        let mut world = GameWorld::with_timer(MATCH_DURATION);
        world.add_player(HOST_SLOT, SPAWNS[0]);
        world.add_player(JOINER_SLOT, SPAWNS[1]);

        self.game = Some(match role {
            Role::Host => {
                world.reset(now);
                let local = endpoint.player_id().unwrap_or(duel::HOST_PLAYER_ID);
                let sync = HostSync::new(Arc::new(Mutex::new(world)), local, &self.config.sync);
                sync.attach(endpoint);
                Match::Host {
                    sync,
                    last_step: now,
                }
            }
            Role::Joiner => {
                let replica = Replica::new(world, &self.config.sync);
                replica.attach(endpoint);
                Match::Joiner { replica }
            }
        });
        log::info!("Match started as {:?}", role);
    }

    fn end_match(&mut self) {
        let Some(game) = self.game.take() else {
            return;
        };
        if let Some(endpoint) = self.lobby.endpoint() {
            match &game {
                Match::Host { sync, .. } => sync.detach(endpoint),
                Match::Joiner { replica } => replica.detach(endpoint),
            }
        }
        log::info!("Match ended");
    }

    fn step_match(&mut self, now: Instant) {
        let mut quit = false;
        match &mut self.game {
            Some(Match::Host { sync, last_step }) => {
                let dt = now.saturating_duration_since(*last_step).as_secs_f32();
                *last_step = now;
                {
                    let mut world = lock(sync.world());
                    for command in sync.poll_commands() {
                        if command == HostCommand::QuitToMenu {
                            quit = true;
                        } else {
                            apply_command(&mut world, command, now);
                        }
                    }
                    if world.status() == GameStatus::Playing {
                        simulate(&mut world, dt, now);
                    }
                }
                if let Some(endpoint) = self.lobby.endpoint() {
                    sync.tick(now, endpoint);
                }
            }
            Some(Match::Joiner { replica }) => replica.advance(now),
            None => {}
        }

        if quit {
            self.lobby.quit_to_main();
            self.end_match();
        }
    }

    pub fn view(&self, now: Instant) -> AppView {
        AppView {
            state: self.lobby.state(),
            role: self.lobby.role(),
            code: self.lobby.code(),
            error: self.lobby.error().map(str::to_string),
            player_id: self.lobby.player_id(),
            participants: self.lobby.participant_count(),
            countdown: self.lobby.countdown_remaining(now),
            countdown_total: self.config.countdown,
            network: self.lobby.network_stats().unwrap_or_default(),
            uptime_secs: now.saturating_duration_since(self.started).as_secs(),
            game: self.match_summary(now),
        }
    }

    fn match_summary(&self, now: Instant) -> Option<MatchSummary> {
        match &self.game {
            Some(Match::Host { sync, .. }) => Some(summarize(&lock(sync.world()), now)),
            Some(Match::Joiner { replica }) => Some(replica.with_world(|w| summarize(w, now))),
            None => None,
        }
    }
}

fn apply_command(world: &mut GameWorld, command: HostCommand, now: Instant) {
    match command {
        HostCommand::Move { player_id, dx, dy } => {
            if let Some(player) = world.player_mut(player_id).filter(|p| p.is_alive) {
                let step = Vec2::new(dx, dy).normalize_or_zero() * MOVE_STEP;
                player.position = (player.position + step).clamp(Vec2::ZERO, ARENA);
            }
        }
        HostCommand::Rotate { player_id, dx, dy } => {
            if let (Some(player), Some(angle)) =
                (world.player_mut(player_id), angle_from_direction(dx, dy))
            {
                player.set_angle(angle);
            }
        }
        HostCommand::Shoot { player_id } => {
            let origin = world
                .player(player_id)
                .filter(|p| p.is_alive)
                .map(|p| (p.position, p.angle));
            if let Some((position, angle)) = origin {
                world.spawn_projectile(player_id, position, angle);
            }
        }
        HostCommand::Restart => {
            if world.status() == GameStatus::GameOver {
                world.reset(now);
            }
        }
        HostCommand::QuitToMenu => {}
    }
}

/// Projectile flight, respawns and the end-of-match check.
fn simulate(world: &mut GameWorld, dt: f32, now: Instant) {
    let projectiles = world.projectiles_mut();
    for projectile in projectiles.iter_mut() {
        projectile.position += Vec2::from_angle(projectile.angle) * PROJECTILE_SPEED * dt;
    }
    projectiles.retain(|p| p.position.cmpge(Vec2::ZERO).all() && p.position.cmple(ARENA).all());

    for player in world.players_mut() {
        if player.can_respawn(now) {
            let spawn = player.spawn;
            player.respawn(spawn);
        }
    }

    if world.check_win_condition(now) {
        log::info!("Match over, winner {:?}", world.winner());
    }
}

fn summarize(world: &GameWorld, now: Instant) -> MatchSummary {
    MatchSummary {
        status: world.status(),
        winner: world.winner(),
        timer_remaining: world.timer().remaining(now),
        players: world
            .players()
            .map(|p| PlayerSummary {
                id: p.id,
                health: p.health,
                score: p.score,
                is_alive: p.is_alive,
                position: p.position,
            })
            .collect(),
        projectiles: world.projectiles().len(),
    }
}
