pub mod lobby;
pub mod net;
pub mod snapshot;
pub mod sync;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use lobby::{LobbyConfig, LobbyEvent, LobbySession, LobbyState, Role};
pub use net::{
    Address, ConnectionState, Endpoint, EndpointConfig, EndpointEvent, HOST_PLAYER_ID,
    InputAction, Message, MessageKind, NetError, NetworkStats, PacketLossSimulation, PlayerId,
    PlayerInput, Relay, RelayConfig, RelayEvent, SessionCode, SessionRegistry,
};
pub use snapshot::{GameStatus, GameWorld, PlayerState, ProjectileState, Snapshot};
pub use sync::{
    HOST_SLOT, HostCommand, HostSync, Interpolation, JOINER_SLOT, Replica, SnapshotBroadcaster,
    SyncConfig,
};

/// A panicked holder leaves plain data behind; keep using it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
