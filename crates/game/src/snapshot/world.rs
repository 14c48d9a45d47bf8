use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use glam::Vec2;

use crate::net::PlayerId;

use super::entity::{GameStatus, PlayerState, ProjectileState, Snapshot, octant};

pub const RESPAWN_DELAY: Duration = Duration::from_millis(3000);
pub const MATCH_DURATION: Duration = Duration::from_secs(180);
pub const PLAYER_HEALTH: i32 = 100;
pub const POINTS_TO_WIN: u32 = 10;

#[derive(Debug, Clone)]
pub struct PlayerEntity {
    pub id: PlayerId,
    pub position: Vec2,
    pub angle: f32,
    pub health: i32,
    pub max_health: i32,
    pub is_alive: bool,
    pub score: u32,
    pub is_respawning: bool,
    pub death_time: Option<Instant>,
    /// Remaining respawn delay as reported by the host; wins over
    /// `death_time` on the joiner.
    pub respawn_override: Option<Duration>,
    pub spawn: Vec2,
    visual_revision: u32,
}

impl PlayerEntity {
    pub fn new(id: PlayerId, spawn: Vec2) -> Self {
        Self {
            id,
            position: spawn,
            angle: 0.0,
            health: PLAYER_HEALTH,
            max_health: PLAYER_HEALTH,
            is_alive: true,
            score: 0,
            is_respawning: false,
            death_time: None,
            respawn_override: None,
            spawn,
            visual_revision: 0,
        }
    }

    /// Applies a new heading. The visual revision is bumped only when the
    /// eight-way direction changes, which is when the sprite must be redrawn.
    pub fn set_angle(&mut self, angle: f32) -> bool {
        let changed = octant(angle) != octant(self.angle);
        self.angle = angle;
        if changed {
            self.visual_revision = self.visual_revision.wrapping_add(1);
        }
        changed
    }

    pub fn visual_revision(&self) -> u32 {
        self.visual_revision
    }

    pub fn kill(&mut self, now: Instant) {
        self.health = 0;
        self.is_alive = false;
        self.is_respawning = true;
        self.death_time = Some(now);
    }

    pub fn respawn_remaining(&self, now: Instant) -> Duration {
        if !self.is_respawning {
            return Duration::ZERO;
        }
        if let Some(remaining) = self.respawn_override {
            return remaining;
        }
        match self.death_time {
            Some(died) => RESPAWN_DELAY.saturating_sub(now.saturating_duration_since(died)),
            None => Duration::ZERO,
        }
    }

    pub fn can_respawn(&self, now: Instant) -> bool {
        self.is_respawning && self.respawn_remaining(now).is_zero()
    }

    pub fn respawn(&mut self, position: Vec2) {
        self.position = position;
        self.health = self.max_health;
        self.is_alive = true;
        self.is_respawning = false;
        self.death_time = None;
        self.respawn_override = None;
    }

    pub fn to_state(&self, now: Instant) -> PlayerState {
        PlayerState {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            angle: self.angle,
            health: self.health,
            is_alive: self.is_alive,
            score: self.score,
            is_respawning: self.is_respawning,
            respawn_time_remaining: self.respawn_remaining(now).as_millis() as u64,
            spawn_x: self.spawn.x,
            spawn_y: self.spawn.y,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileEntity {
    pub id: u32,
    pub position: Vec2,
    pub angle: f32,
    pub owner: Option<PlayerId>,
}

impl ProjectileEntity {
    pub fn to_state(&self) -> ProjectileState {
        ProjectileState {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            angle: self.angle,
            owner_id: self.owner,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchTimer {
    duration: Duration,
    deadline: Option<Instant>,
}

impl MatchTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.deadline = Some(now + self.duration);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Re-bases the local deadline so `remaining(now)` equals `remaining`.
    pub fn rebase(&mut self, remaining: Duration, now: Instant) {
        self.deadline = Some(now + remaining.min(self.duration));
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    /// The full duration while inactive.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(now),
            None => self.duration,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.is_active() && self.remaining(now).is_zero()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Default for MatchTimer {
    fn default() -> Self {
        Self::new(MATCH_DURATION)
    }
}

/// Shared simulation state. The host's simulation writes it and snapshots are
/// taken from it; on the joiner snapshots are applied into it.
#[derive(Debug, Clone, Default)]
pub struct GameWorld {
    players: BTreeMap<PlayerId, PlayerEntity>,
    projectiles: Vec<ProjectileEntity>,
    status: GameStatus,
    winner: Option<PlayerId>,
    timer: MatchTimer,
    next_projectile_id: u32,
}

impl GameWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timer(duration: Duration) -> Self {
        Self {
            timer: MatchTimer::new(duration),
            ..Self::default()
        }
    }

    pub fn add_player(&mut self, id: PlayerId, spawn: Vec2) -> &mut PlayerEntity {
        self.players
            .entry(id)
            .or_insert_with(|| PlayerEntity::new(id, spawn))
    }

    pub fn remove_player(&mut self, id: PlayerId) -> Option<PlayerEntity> {
        self.players.remove(&id)
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerEntity> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerEntity> {
        self.players.get_mut(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.players.values()
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut PlayerEntity> {
        self.players.values_mut()
    }

    pub fn projectiles(&self) -> &[ProjectileEntity] {
        &self.projectiles
    }

    pub fn projectiles_mut(&mut self) -> &mut Vec<ProjectileEntity> {
        &mut self.projectiles
    }

    pub fn spawn_projectile(&mut self, owner: PlayerId, position: Vec2, angle: f32) -> u32 {
        let id = self.next_projectile_id;
        self.next_projectile_id = self.next_projectile_id.wrapping_add(1);
        self.projectiles.push(ProjectileEntity {
            id,
            position,
            angle,
            owner: Some(owner),
        });
        id
    }

    pub fn replace_projectiles(&mut self, projectiles: Vec<ProjectileEntity>) {
        self.projectiles = projectiles;
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn set_status(&mut self, status: GameStatus) {
        if self.status != status {
            log::debug!("Game status {} -> {}", self.status.as_str(), status.as_str());
        }
        self.status = status;
    }

    /// Pause toggles between playing and paused; other states are left alone.
    pub fn toggle_pause(&mut self) {
        match self.status {
            GameStatus::Playing => self.set_status(GameStatus::Paused),
            GameStatus::Paused => self.set_status(GameStatus::Playing),
            _ => {}
        }
    }

    pub fn resume(&mut self) {
        if self.status == GameStatus::Paused {
            self.set_status(GameStatus::Playing);
        }
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    pub fn set_winner(&mut self, winner: Option<PlayerId>) {
        self.winner = winner;
    }

    pub fn timer(&self) -> &MatchTimer {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut MatchTimer {
        &mut self.timer
    }

    /// Ends the match on score or time. Returns true when it just ended.
    pub fn check_win_condition(&mut self, now: Instant) -> bool {
        if self.status == GameStatus::GameOver {
            return false;
        }

        let leader = self.players().find(|p| p.score >= POINTS_TO_WIN).map(|p| p.id);
        if let Some(leader_id) = leader {
            self.winner = Some(leader_id);
            self.set_status(GameStatus::GameOver);
            return true;
        }

        if self.timer.is_expired(now) {
            let mut ranked: Vec<_> = self.players().map(|p| (p.score, p.id)).collect();
            ranked.sort_by(|a, b| b.cmp(a));
            self.winner = match ranked.as_slice() {
                [(first, id), (second, _), ..] if first > second => Some(*id),
                [(_, id)] => Some(*id),
                _ => None,
            };
            self.set_status(GameStatus::GameOver);
            return true;
        }

        false
    }

    /// Starts a fresh match with everyone back at their spawn.
    pub fn reset(&mut self, now: Instant) {
        self.winner = None;
        self.projectiles.clear();
        for player in self.players.values_mut() {
            let spawn = player.spawn;
            player.respawn(spawn);
            player.score = 0;
        }
        self.timer.start(now);
        self.set_status(GameStatus::Playing);
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            players: self.players.values().map(|p| p.to_state(now)).collect(),
            projectiles: self.projectiles.iter().map(ProjectileEntity::to_state).collect(),
            game_status: self.status,
            winner: self.winner,
            timer_remaining: self.timer.remaining(now).as_millis() as u64,
            timer_active: self.timer.is_active(),
        }
    }
}
