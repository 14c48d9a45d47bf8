use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use serde::{Deserialize, Serialize};

pub const LOOPBACK_HOST: &str = "127.0.0.1";

const LOCALHOST: &str = "localhost";
const ROUTE_TARGET_ADDR: &str = "8.8.8.8:80";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn loopback(port: u16) -> Self {
        Self::new(LOOPBACK_HOST, port)
    }

    /// `localhost` and `127.0.0.1` name the same peer.
    pub fn canonical_host(&self) -> &str {
        if self.host.eq_ignore_ascii_case(LOCALHOST) {
            LOOPBACK_HOST
        } else {
            &self.host
        }
    }

    pub fn is_loopback(&self) -> bool {
        match self.canonical_host().parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback(),
            Err(_) => false,
        }
    }

    pub fn to_socket_addr(&self) -> io::Result<SocketAddr> {
        let mut candidates = (self.canonical_host(), self.port).to_socket_addrs()?;
        let mut fallback = None;
        for addr in candidates.by_ref() {
            if addr.is_ipv4() {
                return Ok(addr);
            }
            fallback.get_or_insert(addr);
        }
        fallback.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address found for {}", self),
            )
        })
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.canonical_host() == other.canonical_host()
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_host().hash(state);
        self.port.hash(state);
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Port must match exactly; any two loopback IPs are considered the same host.
pub fn same_peer(a: &SocketAddr, b: &SocketAddr) -> bool {
    if a.port() != b.port() {
        return false;
    }
    a.ip() == b.ip() || (a.ip().is_loopback() && b.ip().is_loopback())
}

/// Address of the interface that routes outward. Connecting a UDP socket sends
/// nothing, it only selects a route.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(ROUTE_TARGET_ADDR).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
