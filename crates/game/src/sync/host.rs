use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::lock;
use crate::net::{Endpoint, InputAction, Message, MessageKind, PlayerId, PlayerInput};
use crate::snapshot::{GameStatus, GameWorld};

use super::{JOINER_SLOT, SyncConfig};
use super::broadcaster::{MessageSink, SnapshotBroadcaster};

/// Inputs from the remote player that the external simulation must apply.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Move { player_id: PlayerId, dx: f32, dy: f32 },
    Rotate { player_id: PlayerId, dx: f32, dy: f32 },
    Shoot { player_id: PlayerId },
    QuitToMenu,
    Restart,
}

/// Host side of state sync: consumes `player_input` / `restart_request` and
/// broadcasts snapshots of the shared world. `local_player` is the host's
/// relay identity; remote input always drives `JOINER_SLOT`.
pub struct HostSync {
    world: Arc<Mutex<GameWorld>>,
    commands: Arc<Mutex<VecDeque<HostCommand>>>,
    broadcaster: SnapshotBroadcaster,
    local_player: PlayerId,
}

impl HostSync {
    pub fn new(world: Arc<Mutex<GameWorld>>, local_player: PlayerId, config: &SyncConfig) -> Self {
        Self {
            world,
            commands: Arc::new(Mutex::new(VecDeque::new())),
            broadcaster: SnapshotBroadcaster::new(config.snapshot_interval),
            local_player,
        }
    }

    pub fn attach(&self, endpoint: &Endpoint) {
        let world = Arc::clone(&self.world);
        let commands = Arc::clone(&self.commands);
        let local_player = self.local_player;
        endpoint.register_handler(MessageKind::PlayerInput, move |message| {
            if let Message::PlayerInput { data } = message {
                let command = handle_remote_input(&mut lock(&world), data, local_player);
                if let Some(command) = command {
                    lock(&commands).push_back(command);
                }
            }
        });

        let world = Arc::clone(&self.world);
        let commands = Arc::clone(&self.commands);
        endpoint.register_handler(MessageKind::RestartRequest, move |_| {
            if lock(&world).status() == GameStatus::GameOver {
                lock(&commands).push_back(HostCommand::Restart);
            }
        });
    }

    pub fn detach(&self, endpoint: &Endpoint) {
        endpoint.unregister_handler(MessageKind::PlayerInput);
        endpoint.unregister_handler(MessageKind::RestartRequest);
    }

    pub fn poll_commands(&self) -> Vec<HostCommand> {
        lock(&self.commands).drain(..).collect()
    }

    /// Broadcasts a snapshot of the world when one is due.
    pub fn tick<S: MessageSink + ?Sized>(&mut self, now: Instant, sink: &S) -> bool {
        let world = &self.world;
        self.broadcaster
            .tick(now, sink, || lock(world).snapshot(now))
    }

    pub fn world(&self) -> &Arc<Mutex<GameWorld>> {
        &self.world
    }

    pub fn snapshots_sent(&self) -> u64 {
        self.broadcaster.sent()
    }
}

/// Input relayed to the host. Its `player_id` is the sender's relay identity,
/// which only tells the host's own echoes apart from the joiner.
fn handle_remote_input(
    world: &mut GameWorld,
    input: &PlayerInput,
    local_player: PlayerId,
) -> Option<HostCommand> {
    if input.player_id == local_player {
        return None;
    }
    handle_input(world, input, JOINER_SLOT)
}

/// Pause and resume apply to the world directly; the rest is surfaced as a
/// command for `slot`.
pub fn handle_input(world: &mut GameWorld, input: &PlayerInput, slot: PlayerId) -> Option<HostCommand> {
    match input.action {
        InputAction::Pause => {
            world.toggle_pause();
            None
        }
        InputAction::Resume => {
            world.resume();
            None
        }
        InputAction::QuitToMenu => Some(HostCommand::QuitToMenu),
        InputAction::Move => {
            let (dx, dy) = input.delta();
            Some(HostCommand::Move {
                player_id: slot,
                dx,
                dy,
            })
        }
        InputAction::Rotate => {
            let (dx, dy) = input.delta();
            Some(HostCommand::Rotate {
                player_id: slot,
                dx,
                dy,
            })
        }
        InputAction::Shoot => Some(HostCommand::Shoot { player_id: slot }),
    }
}
