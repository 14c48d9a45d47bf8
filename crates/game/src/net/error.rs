use std::io;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("could not resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("no welcome from {0} within {1:?}")]
    HandshakeTimeout(SocketAddr, Duration),
    #[error("connection to {0} was lost during the handshake")]
    HandshakeAborted(SocketAddr),
    #[error("handshake with {0} was cancelled")]
    HandshakeCancelled(SocketAddr),
}
