use serde::{Deserialize, Serialize};

use crate::net::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Menu,
    Playing,
    GameOver,
    Paused,
    #[default]
    Waiting,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Menu => "menu",
            GameStatus::Playing => "playing",
            GameStatus::GameOver => "game_over",
            GameStatus::Paused => "paused",
            GameStatus::Waiting => "waiting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
    /// Degrees.
    pub angle: f32,
    pub health: i32,
    pub is_alive: bool,
    pub score: u32,
    pub is_respawning: bool,
    /// Milliseconds.
    #[serde(default)]
    pub respawn_time_remaining: u64,
    pub spawn_x: f32,
    pub spawn_y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub owner_id: Option<PlayerId>,
}

/// Authoritative state as broadcast by the host. Each one fully replaces the
/// joiner's view; nothing is acknowledged or retransmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Snapshot {
    pub players: Vec<PlayerState>,
    pub projectiles: Vec<ProjectileState>,
    pub game_status: GameStatus,
    pub winner: Option<PlayerId>,
    /// Milliseconds.
    pub timer_remaining: u64,
    pub timer_active: bool,
}

impl Snapshot {
    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == id)
    }
}

/// Index of the nearest of the eight compass directions.
pub fn octant(angle: f32) -> u8 {
    let normalized = angle.rem_euclid(360.0);
    ((normalized / 45.0).round() as u32 % 8) as u8
}

pub fn quantize_angle(angle: f32) -> f32 {
    f32::from(octant(angle)) * 45.0
}

/// Angle a movement/aim vector points at, snapped to eight directions.
pub fn angle_from_direction(dx: f32, dy: f32) -> Option<f32> {
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    Some(quantize_angle(dy.atan2(dx).to_degrees()))
}
