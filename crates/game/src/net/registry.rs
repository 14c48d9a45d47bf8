use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::address::Address;
use super::code::{self, SessionCode};

pub const REGISTRY_TTL: Duration = Duration::from_secs(300);
pub const REGISTRY_FILE_NAME: &str = "duel_sessions.json";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("registry encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub host: String,
    pub port: u16,
    pub timestamp: i64,
}

impl RegistryEntry {
    fn is_fresh(&self, now: i64, ttl: Duration) -> bool {
        now.saturating_sub(self.timestamp) <= ttl.as_secs() as i64
    }

    pub fn address(&self) -> Address {
        Address::new(self.host.clone(), self.port)
    }
}

type Entries = HashMap<String, RegistryEntry>;

#[derive(Debug)]
enum Store {
    File(PathBuf),
    Memory(Mutex<Entries>),
}

/// Maps session codes to exact host addresses so same-machine joins do not
/// depend on the lossy code decode.
#[derive(Debug)]
pub struct SessionRegistry {
    store: Store,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn in_memory() -> Self {
        Self {
            store: Store::Memory(Mutex::new(HashMap::new())),
            ttl: REGISTRY_TTL,
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            store: Store::File(path.into()),
            ttl: REGISTRY_TTL,
        }
    }

    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(REGISTRY_FILE_NAME)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.store {
            Store::File(path) => Some(path),
            Store::Memory(_) => None,
        }
    }

    pub fn register(&self, code: &SessionCode, address: &Address) -> Result<(), RegistryError> {
        let now = Utc::now().timestamp();
        let ttl = self.ttl;
        self.update(|entries| {
            entries.retain(|_, entry| entry.is_fresh(now, ttl));
            entries.insert(
                code.as_str().to_string(),
                RegistryEntry {
                    host: address.host.clone(),
                    port: address.port,
                    timestamp: now,
                },
            );
        })?;
        log::debug!("registered {} -> {}", code, address);
        Ok(())
    }

    pub fn remove(&self, code: &SessionCode) -> Result<(), RegistryError> {
        self.update(|entries| {
            entries.remove(code.as_str());
        })
    }

    pub fn lookup(&self, code: &str) -> Option<Address> {
        let now = Utc::now().timestamp();
        self.load()
            .get(code)
            .filter(|entry| entry.is_fresh(now, self.ttl))
            .map(RegistryEntry::address)
    }

    fn update(&self, mutate: impl FnOnce(&mut Entries)) -> Result<(), RegistryError> {
        match &self.store {
            Store::Memory(entries) => {
                mutate(&mut crate::lock(entries));
                Ok(())
            }
            Store::File(path) => {
                let mut entries = read_entries(path);
                mutate(&mut entries);
                let json = serde_json::to_string_pretty(&entries)?;
                fs::write(path, json)?;
                Ok(())
            }
        }
    }

    fn load(&self) -> Entries {
        match &self.store {
            Store::Memory(entries) => crate::lock(entries).clone(),
            Store::File(path) => read_entries(path),
        }
    }
}

/// A missing or unreadable file is an empty registry.
fn read_entries(path: &Path) -> Entries {
    let Ok(data) = fs::read(path) else {
        return HashMap::new();
    };
    match serde_json::from_slice(&data) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("ignoring corrupt session registry {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

/// Fresh registry entries win over the lossy decode.
pub fn resolve(input: &str, registry: Option<&SessionRegistry>) -> Option<Address> {
    let code = SessionCode::parse(input).ok()?;
    if let Some(address) = registry.and_then(|r| r.lookup(code.as_str())) {
        return Some(address);
    }
    code::decode(code.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static FILE_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_registry_path() -> PathBuf {
        let n = FILE_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("duel_registry_test_{}_{}.json", std::process::id(), n))
    }

    #[test]
    fn test_memory_register_and_lookup() {
        let registry = SessionRegistry::in_memory();
        let code = SessionCode::loopback();
        registry.register(&code, &Address::loopback(40123)).unwrap();

        assert_eq!(registry.lookup("LOCALL"), Some(Address::loopback(40123)));
        registry.remove(&code).unwrap();
        assert_eq!(registry.lookup("LOCALL"), None);
    }

    #[test]
    fn test_file_round_trip_and_format() {
        let path = temp_registry_path();
        let registry = SessionRegistry::at_path(&path);
        let code = SessionCode::parse("0A1B2C").unwrap();
        registry.register(&code, &Address::new("192.168.1.20", 5000)).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["0A1B2C"]["host"], "192.168.1.20");
        assert_eq!(raw["0A1B2C"]["port"], 5000);
        assert!(raw["0A1B2C"]["timestamp"].is_i64());

        let other = SessionRegistry::at_path(&path);
        assert_eq!(other.lookup("0A1B2C"), Some(Address::new("192.168.1.20", 5000)));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_stale_entries_are_ignored() {
        let path = temp_registry_path();
        let stale = Utc::now().timestamp() - REGISTRY_TTL.as_secs() as i64 - 5;
        fs::write(
            &path,
            format!(r#"{{"LOCALL": {{"host": "127.0.0.1", "port": 4000, "timestamp": {}}}}}"#, stale),
        )
        .unwrap();

        let registry = SessionRegistry::at_path(&path);
        assert_eq!(registry.lookup("LOCALL"), None);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let path = temp_registry_path();
        fs::write(&path, b"{not json").unwrap();

        let registry = SessionRegistry::at_path(&path);
        assert_eq!(registry.lookup("LOCALL"), None);
        registry
            .register(&SessionCode::loopback(), &Address::loopback(4001))
            .unwrap();
        assert_eq!(registry.lookup("LOCALL"), Some(Address::loopback(4001)));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_resolve_prefers_registry() {
        let registry = SessionRegistry::in_memory();
        assert_eq!(
            resolve("locall", Some(&registry)),
            Some(Address::loopback(code::DEFAULT_PORT))
        );

        registry
            .register(&SessionCode::loopback(), &Address::loopback(41000))
            .unwrap();
        assert_eq!(resolve("locall", Some(&registry)), Some(Address::loopback(41000)));
        assert_eq!(resolve("??", Some(&registry)), None);
    }
}
