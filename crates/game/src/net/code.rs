use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::address::Address;

pub const CODE_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const CODE_LENGTH: usize = 6;
pub const MIN_CODE_LENGTH: usize = 4;
pub const LOOPBACK_CODE: &str = "LOCALL";
pub const DEFAULT_PORT: u16 = 12345;

/// Leading octets tried on decode, most likely first. Only the last two octets
/// travel inside a code.
pub const GUESSED_PREFIXES: [[u8; 2]; 3] = [[192, 168], [10, 0], [172, 16]];

const CODE_CAPACITY: u64 = 36u64.pow(CODE_LENGTH as u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("code must be {MIN_CODE_LENGTH}-{CODE_LENGTH} characters, got {0}")]
    Length(usize),
    #[error("invalid character {0:?} in session code")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    pub fn loopback() -> Self {
        Self(LOOPBACK_CODE.to_string())
    }

    /// Normalizes user input (trim, uppercase) and validates it.
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let normalized = input.trim().to_ascii_uppercase();
        validate(&normalized)?;
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_loopback(&self) -> bool {
        self.0 == LOOPBACK_CODE
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate(code: &str) -> Result<(), CodeError> {
    let len = code.chars().count();
    if !(MIN_CODE_LENGTH..=CODE_LENGTH).contains(&len) {
        return Err(CodeError::Length(len));
    }
    match code.chars().find(|c| digit_value(*c).is_none()) {
        Some(c) => Err(CodeError::InvalidChar(c)),
        None => Ok(()),
    }
}

fn digit_value(c: char) -> Option<u64> {
    CODE_ALPHABET
        .iter()
        .position(|&b| b as char == c)
        .map(|p| p as u64)
}

fn to_base36(mut value: u64) -> String {
    let mut digits = [b'0'; CODE_LENGTH];
    for slot in digits.iter_mut().rev() {
        *slot = CODE_ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    digits.iter().map(|&b| b as char).collect()
}

fn from_base36(code: &str) -> Option<u64> {
    code.chars()
        .try_fold(0u64, |acc, c| digit_value(c).map(|d| acc * 36 + d))
}

fn combine(ip: Ipv4Addr, port: u16) -> u64 {
    let [_, _, third, fourth] = ip.octets();
    (u64::from(third) << 24) | (u64::from(fourth) << 16) | u64::from(port)
}

/// Values the sentinel itself decodes to are treated as unrepresentable so a
/// derived code can never collide with it.
fn is_representable(combined: u64) -> bool {
    combined < CODE_CAPACITY && Some(combined) != from_base36(LOOPBACK_CODE)
}

pub fn encode(host: &str, port: u16) -> SessionCode {
    let address = Address::new(host, port);
    match address.canonical_host().parse::<IpAddr>() {
        Ok(ip) => encode_ip(ip, port),
        Err(_) => SessionCode::loopback(),
    }
}

pub fn encode_ip(ip: IpAddr, port: u16) -> SessionCode {
    let IpAddr::V4(v4) = ip else {
        return SessionCode::loopback();
    };
    if v4.is_loopback() || v4.is_unspecified() {
        return SessionCode::loopback();
    }

    let combined = combine(v4, port);
    if !is_representable(combined) {
        log::debug!("{}:{} does not fit a session code", v4, port);
        return SessionCode::loopback();
    }

    SessionCode(to_base36(combined))
}

/// Decodes using the most likely network prefix. See [`decode_candidates`]
/// for the full list of plausible hosts.
pub fn decode(code: &str) -> Option<Address> {
    decode_candidates(code).into_iter().next()
}

pub fn decode_candidates(code: &str) -> Vec<Address> {
    if code == LOOPBACK_CODE {
        return vec![Address::loopback(DEFAULT_PORT)];
    }
    if validate(code).is_err() {
        return Vec::new();
    }
    let Some(combined) = from_base36(code) else {
        return Vec::new();
    };
    if combined >= CODE_CAPACITY {
        return Vec::new();
    }

    let port = (combined & 0xFFFF) as u16;
    let fourth = ((combined >> 16) & 0xFF) as u8;
    let third = ((combined >> 24) & 0xFF) as u8;

    GUESSED_PREFIXES
        .iter()
        .map(|[a, b]| Address::new(Ipv4Addr::new(*a, *b, third, fourth).to_string(), port))
        .collect()
}
