mod broadcaster;
mod host;
mod interpolation;
mod replica;

use std::time::Duration;

use crate::net::{InputAction, Message, PlayerId, PlayerInput};

pub use broadcaster::{MessageSink, SnapshotBroadcaster};
pub use host::{HostCommand, HostSync, handle_input};
pub use interpolation::{Easing, Interpolation, ease_out_cubic};
pub use replica::Replica;

pub const SNAPSHOT_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

/// World slots are fixed per role. Relay identities are not: a joiner that
/// reconnects comes back with a fresh one.
pub const HOST_SLOT: PlayerId = 0;
pub const JOINER_SLOT: PlayerId = 1;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub snapshot_interval: Duration,
    /// Matches the snapshot interval so each move lands as the next arrives.
    pub interpolation_duration: Duration,
    pub interpolation: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: SNAPSHOT_INTERVAL,
            interpolation_duration: SNAPSHOT_INTERVAL,
            interpolation: true,
        }
    }
}

pub fn send_input<S: MessageSink + ?Sized>(sink: &S, input: PlayerInput) -> bool {
    sink.send_message(&Message::PlayerInput { data: input })
}

pub fn send_action<S: MessageSink + ?Sized>(sink: &S, action: InputAction, player_id: PlayerId) -> bool {
    send_input(sink, PlayerInput::new(action, player_id))
}

pub fn request_restart<S: MessageSink + ?Sized>(sink: &S) -> bool {
    sink.send_message(&Message::RestartRequest)
}
