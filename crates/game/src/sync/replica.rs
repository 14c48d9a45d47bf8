use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use glam::Vec2;

use crate::lock;
use crate::net::{Endpoint, Message, MessageKind, PlayerId};
use crate::snapshot::{GameStatus, GameWorld, ProjectileEntity, Snapshot};

use super::SyncConfig;
use super::interpolation::{Easing, Interpolation};

#[derive(Debug)]
struct ReplicaState {
    world: GameWorld,
    players: HashMap<PlayerId, Interpolation>,
    projectiles: HashMap<u32, Interpolation>,
    duration: Duration,
    interpolate: bool,
    applied: u64,
}

/// Joiner-side copy of the host's world. Snapshot application and reads
/// share one lock so the render side never sees a half-applied snapshot.
#[derive(Debug, Clone)]
pub struct Replica {
    state: Arc<Mutex<ReplicaState>>,
}

impl Replica {
    pub fn new(world: GameWorld, config: &SyncConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplicaState {
                world,
                players: HashMap::new(),
                projectiles: HashMap::new(),
                duration: config.interpolation_duration,
                interpolate: config.interpolation,
                applied: 0,
            })),
        }
    }

    /// Applies every `game_state_update` the endpoint receives.
    pub fn attach(&self, endpoint: &Endpoint) {
        let replica = self.clone();
        endpoint.register_handler(MessageKind::GameStateUpdate, move |message| {
            if let Message::GameStateUpdate { data } = message {
                replica.apply(data, Instant::now());
            }
        });
    }

    pub fn detach(&self, endpoint: &Endpoint) {
        endpoint.unregister_handler(MessageKind::GameStateUpdate);
    }

    pub fn apply(&self, snapshot: &Snapshot, now: Instant) {
        lock(&self.state).apply(snapshot, now);
    }

    /// Moves every in-flight interpolation; finished ones are dropped.
    pub fn advance(&self, now: Instant) {
        lock(&self.state).advance(now);
    }

    pub fn with_world<R>(&self, f: impl FnOnce(&GameWorld) -> R) -> R {
        f(&lock(&self.state).world)
    }

    pub fn with_world_mut<R>(&self, f: impl FnOnce(&mut GameWorld) -> R) -> R {
        f(&mut lock(&self.state).world)
    }

    pub fn player_interpolation(&self, id: PlayerId) -> Option<Interpolation> {
        lock(&self.state).players.get(&id).cloned()
    }

    pub fn projectile_interpolation(&self, id: u32) -> Option<Interpolation> {
        lock(&self.state).projectiles.get(&id).cloned()
    }

    pub fn interpolations_in_flight(&self) -> usize {
        let state = lock(&self.state);
        state.players.len() + state.projectiles.len()
    }

    pub fn snapshots_applied(&self) -> u64 {
        lock(&self.state).applied
    }
}

impl ReplicaState {
    fn apply(&mut self, snapshot: &Snapshot, now: Instant) {
        self.applied += 1;

        // Out-of-order datagrams must not knock an active match back to waiting.
        let current = self.world.status();
        if !(current == GameStatus::Playing && snapshot.game_status == GameStatus::Waiting) {
            self.world.set_status(snapshot.game_status);
        }

        if snapshot.timer_active {
            self.world
                .timer_mut()
                .rebase(Duration::from_millis(snapshot.timer_remaining), now);
        } else {
            self.world.timer_mut().stop();
        }

        if snapshot.winner.is_some() {
            self.world.set_winner(snapshot.winner);
        }

        self.apply_players(snapshot, now);
        self.apply_projectiles(snapshot, now);
    }

    fn apply_players(&mut self, snapshot: &Snapshot, now: Instant) {
        for state in &snapshot.players {
            let target = Vec2::new(state.x, state.y);
            let spawn = Vec2::new(state.spawn_x, state.spawn_y);

            let known = self.world.player(state.id).is_some();
            let player = self.world.add_player(state.id, target);
            player.health = state.health;
            player.is_alive = state.is_alive;
            player.score = state.score;
            player.is_respawning = state.is_respawning;
            player.respawn_override = state
                .is_respawning
                .then(|| Duration::from_millis(state.respawn_time_remaining));
            player.spawn = spawn;
            player.set_angle(state.angle);

            if self.interpolate && known {
                let start = player.position;
                self.players.insert(
                    state.id,
                    Interpolation::new(start, target, now, self.duration, Easing::EaseOutCubic),
                );
            } else {
                player.position = target;
                self.players.remove(&state.id);
            }
        }

        self.players
            .retain(|id, _| snapshot.players.iter().any(|p| p.id == *id));
    }

    fn apply_projectiles(&mut self, snapshot: &Snapshot, now: Instant) {
        let previous: HashMap<u32, Vec2> = self
            .world
            .projectiles()
            .iter()
            .map(|p| (p.id, p.position))
            .collect();

        let mut rebuilt = Vec::with_capacity(snapshot.projectiles.len());
        for state in &snapshot.projectiles {
            let target = Vec2::new(state.x, state.y);
            let position = match previous.get(&state.id) {
                Some(&old) if self.interpolate => {
                    self.projectiles.insert(
                        state.id,
                        Interpolation::new(old, target, now, self.duration, Easing::Linear),
                    );
                    old
                }
                _ => target,
            };
            rebuilt.push(ProjectileEntity {
                id: state.id,
                position,
                angle: state.angle,
                owner: state.owner_id,
            });
        }

        self.projectiles
            .retain(|id, _| snapshot.projectiles.iter().any(|p| p.id == *id));
        self.world.replace_projectiles(rebuilt);
    }

    fn advance(&mut self, now: Instant) {
        let world = &mut self.world;

        self.players.retain(|id, interp| match world.player_mut(*id) {
            Some(player) => {
                player.position = interp.sample(now);
                !interp.is_complete(now)
            }
            None => false,
        });

        let projectiles = world.projectiles_mut();
        self.projectiles.retain(|id, interp| {
            match projectiles.iter_mut().find(|p| p.id == *id) {
                Some(projectile) => {
                    projectile.position = interp.sample(now);
                    !interp.is_complete(now)
                }
                None => false,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{PlayerState, ProjectileState};

    fn player(id: PlayerId, x: f32, y: f32) -> PlayerState {
        PlayerState {
            id,
            x,
            y,
            angle: 0.0,
            health: 100,
            is_alive: true,
            score: 0,
            is_respawning: false,
            respawn_time_remaining: 0,
            spawn_x: x,
            spawn_y: y,
        }
    }

    fn snapshot(status: GameStatus, players: Vec<PlayerState>) -> Snapshot {
        Snapshot {
            players,
            game_status: status,
            ..Default::default()
        }
    }

    fn replica() -> Replica {
        Replica::new(GameWorld::new(), &SyncConfig::default())
    }

    #[test]
    fn test_playing_not_regressed_to_waiting() {
        let now = Instant::now();
        let replica = replica();
        replica.apply(&snapshot(GameStatus::Playing, vec![]), now);
        replica.apply(&snapshot(GameStatus::Waiting, vec![]), now);
        assert_eq!(replica.with_world(|w| w.status()), GameStatus::Playing);

        replica.apply(&snapshot(GameStatus::GameOver, vec![]), now);
        assert_eq!(replica.with_world(|w| w.status()), GameStatus::GameOver);
        replica.apply(&snapshot(GameStatus::Waiting, vec![]), now);
        assert_eq!(replica.with_world(|w| w.status()), GameStatus::Waiting);
        replica.apply(&snapshot(GameStatus::Paused, vec![]), now);
        assert_eq!(replica.with_world(|w| w.status()), GameStatus::Paused);
    }

    #[test]
    fn test_first_sighting_places_directly() {
        let now = Instant::now();
        let replica = replica();
        replica.apply(&snapshot(GameStatus::Playing, vec![player(1, 50.0, 60.0)]), now);

        assert_eq!(
            replica.with_world(|w| w.player(1).map(|p| p.position)),
            Some(Vec2::new(50.0, 60.0))
        );
        assert!(replica.player_interpolation(1).is_none());
    }

    #[test]
    fn test_position_interpolates_other_fields_immediate() {
        let t0 = Instant::now();
        let replica = replica();
        replica.apply(&snapshot(GameStatus::Playing, vec![player(1, 0.0, 0.0)]), t0);

        let mut update = player(1, 30.0, 0.0);
        update.health = 40;
        update.score = 2;
        update.angle = 90.0;
        replica.apply(&snapshot(GameStatus::Playing, vec![update]), t0);

        replica.with_world(|w| {
            let p = w.player(1).unwrap();
            assert_eq!(p.position, Vec2::ZERO);
            assert_eq!(p.health, 40);
            assert_eq!(p.score, 2);
            assert_eq!(p.angle, 90.0);
            assert_eq!(p.visual_revision(), 1);
        });

        let duration = SyncConfig::default().interpolation_duration;
        replica.advance(t0 + duration / 2);
        let halfway = replica.with_world(|w| w.player(1).unwrap().position.x);
        assert!(halfway > 15.0 && halfway < 30.0);

        replica.advance(t0 + duration);
        assert_eq!(replica.with_world(|w| w.player(1).unwrap().position), Vec2::new(30.0, 0.0));
        assert_eq!(replica.interpolations_in_flight(), 0);
    }

    #[test]
    fn test_timer_rebased_to_host() {
        let now = Instant::now();
        let replica = replica();
        replica.apply(
            &Snapshot {
                timer_active: true,
                timer_remaining: 42_000,
                winner: Some(1),
                ..Default::default()
            },
            now,
        );

        replica.with_world(|w| {
            assert_eq!(w.timer().remaining(now), Duration::from_secs(42));
            assert_eq!(w.winner(), Some(1));
        });

        replica.apply(&Snapshot::default(), now);
        replica.with_world(|w| {
            assert!(!w.timer().is_active());
            assert_eq!(w.winner(), Some(1));
        });
    }

    #[test]
    fn test_projectiles_rebuilt_and_interpolated() {
        let t0 = Instant::now();
        let replica = replica();
        let shot = |id, x| ProjectileState {
            id,
            x,
            y: 0.0,
            angle: 0.0,
            owner_id: Some(0),
        };

        replica.apply(
            &Snapshot {
                projectiles: vec![shot(1, 10.0), shot(2, 20.0)],
                ..Default::default()
            },
            t0,
        );
        assert!(replica.projectile_interpolation(1).is_none());

        replica.apply(
            &Snapshot {
                projectiles: vec![shot(1, 16.0), shot(3, 5.0)],
                ..Default::default()
            },
            t0,
        );

        replica.with_world(|w| {
            let ids: Vec<u32> = w.projectiles().iter().map(|p| p.id).collect();
            assert_eq!(ids, vec![1, 3]);
            assert_eq!(w.projectiles()[0].position.x, 10.0);
            assert_eq!(w.projectiles()[1].position.x, 5.0);
        });
        let interp = replica.projectile_interpolation(1).unwrap();
        assert_eq!(interp.easing, Easing::Linear);
        assert!(replica.projectile_interpolation(3).is_none());

        replica.apply(&Snapshot::default(), t0);
        assert_eq!(replica.interpolations_in_flight(), 0);
        assert!(replica.with_world(|w| w.projectiles().is_empty()));
    }

    #[test]
    fn test_respawn_override_applied() {
        let now = Instant::now();
        let replica = replica();
        let mut dead = player(1, 0.0, 0.0);
        dead.health = 0;
        dead.is_alive = false;
        dead.is_respawning = true;
        dead.respawn_time_remaining = 3000;
        replica.apply(&snapshot(GameStatus::Playing, vec![dead]), now);

        replica.with_world(|w| {
            let p = w.player(1).unwrap();
            assert_eq!(p.respawn_remaining(now), Duration::from_millis(3000));
        });

        replica.apply(&snapshot(GameStatus::Playing, vec![player(1, 0.0, 0.0)]), now);
        replica.with_world(|w| {
            let p = w.player(1).unwrap();
            assert_eq!(p.respawn_override, None);
            assert!(p.is_alive);
        });
    }

    #[test]
    fn test_interpolation_disabled_snaps() {
        let now = Instant::now();
        let config = SyncConfig {
            interpolation: false,
            ..Default::default()
        };
        let replica = Replica::new(GameWorld::new(), &config);
        replica.apply(&snapshot(GameStatus::Playing, vec![player(0, 0.0, 0.0)]), now);
        replica.apply(&snapshot(GameStatus::Playing, vec![player(0, 8.0, 8.0)]), now);

        assert_eq!(replica.with_world(|w| w.player(0).unwrap().position), Vec2::new(8.0, 8.0));
        assert_eq!(replica.interpolations_in_flight(), 0);
    }
}
