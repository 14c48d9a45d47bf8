mod entity;
mod world;

pub use entity::{
    GameStatus, PlayerState, ProjectileState, Snapshot, angle_from_direction, octant,
    quantize_angle,
};
pub use world::{
    GameWorld, MATCH_DURATION, MatchTimer, PLAYER_HEALTH, POINTS_TO_WIN, PlayerEntity,
    ProjectileEntity, RESPAWN_DELAY,
};
