mod address;
pub mod code;
mod connection;
mod endpoint;
mod error;
mod health;
mod protocol;
pub mod registry;
mod relay;
mod stats;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub use address::{Address, LOOPBACK_HOST, local_ipv4, same_peer};
pub use code::{CodeError, DEFAULT_PORT, LOOPBACK_CODE, SessionCode};
pub use connection::{Admission, LIVENESS_WINDOW, Participant, ParticipantTable};
pub use endpoint::{
    ConnectionState, Endpoint, EndpointConfig, EndpointEvent, Handler, LostReason,
};
pub use error::NetError;
pub use health::{HealthMonitor, PING_INTERVAL, PONG_TIMEOUT};
pub use protocol::{
    DISCONNECT_REASON_TIMEOUT, HOST_PLAYER_ID, InputAction, MAX_DATAGRAM_SIZE, MAX_PLAYERS,
    Message, MessageKind, PlayerId, PlayerInput, ProtocolError, Route,
};
pub use registry::{RegistryEntry, RegistryError, SessionRegistry};
pub use relay::{Relay, RelayConfig, RelayEvent};
pub use stats::{NetworkStats, PacketLossSimulation};

const IDLE_SLICE: Duration = Duration::from_millis(50);

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Sleeps for `duration`, returning early once `running` clears.
pub(crate) fn idle(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(IDLE_SLICE));
    }
}
