// Numan Thabit 2026
// store.rs - object-store collaborator contract and in-memory stand-in

use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{PoisonError, RwLock},
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::warn;

/// Failure kinds surfaced by an object map backend.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found")]
    KeyNotFound,
    #[error("store client error: {0}")]
    Client(String),
    #[error("stored value has the wrong type")]
    IncorrectValueType,
    #[error("failed to serialize value")]
    Serialize,
    #[error("failed to deserialize value")]
    Deserialize,
}

/// Injected codec turning values into stored strings.
pub type Serializer<T> = Box<dyn Fn(&T) -> Result<String, StoreError> + Send + Sync>;
/// Injected codec turning stored strings back into values.
pub type Deserializer<T> = Box<dyn Fn(&str) -> Result<T, StoreError> + Send + Sync>;

/// Typed key→value map used to persist enforcement objects between
/// restarts. Backends serialize values to strings with injected codecs; the
/// enforcement core never depends on which backend is wired in.
pub trait ObjectMap<T> {
    /// Stores `value` at `key`, replacing any previous value.
    fn set(&self, key: &str, value: &T) -> Result<(), StoreError>;

    /// Returns the value stored at `key`.
    fn get(&self, key: &str) -> Result<T, StoreError>;

    /// Returns every stored value. Entries that fail to decode are skipped
    /// with a warning rather than failing the whole read.
    fn get_all(&self) -> Result<Vec<T>, StoreError>;
}

/// In-memory [`ObjectMap`] storing serialized strings, the way a
/// Redis-backed map would. Exercises the codec paths without a server.
pub struct MemoryObjectMap<T> {
    entries: RwLock<HashMap<String, String>>,
    serializer: Serializer<T>,
    deserializer: Deserializer<T>,
    _marker: PhantomData<T>,
}

impl<T> MemoryObjectMap<T> {
    pub fn new(serializer: Serializer<T>, deserializer: Deserializer<T>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            serializer,
            deserializer,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> MemoryObjectMap<T>
where
    T: Serialize + DeserializeOwned,
{
    /// A map with JSON codecs, the serialization the gateway services use.
    pub fn json() -> Self {
        Self::new(
            Box::new(|value: &T| serde_json::to_string(value).map_err(|_| StoreError::Serialize)),
            Box::new(|raw: &str| serde_json::from_str(raw).map_err(|_| StoreError::Deserialize)),
        )
    }
}

impl<T> ObjectMap<T> for MemoryObjectMap<T> {
    fn set(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let serialized = (self.serializer)(value).map_err(|err| {
            warn!(key, "unable to serialize value for store");
            err
        })?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), serialized);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<T, StoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let raw = entries.get(key).ok_or(StoreError::KeyNotFound)?;
        (self.deserializer)(raw).map_err(|err| {
            warn!(key, "failed to deserialize stored value");
            err
        })
    }

    fn get_all(&self) -> Result<Vec<T>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut values = Vec::with_capacity(entries.len());
        for (key, raw) in entries.iter() {
            match (self.deserializer)(raw) {
                Ok(value) => values.push(value),
                Err(_) => warn!(key = %key, "skipping undecodable value in store"),
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionConfig, SessionState};

    #[test]
    fn set_then_get_roundtrips() {
        let map: MemoryObjectMap<SessionState> = MemoryObjectMap::json();
        let session = SessionState::new(
            "IMSI1",
            "1234",
            SessionConfig {
                ue_ipv4: "127.0.0.1".into(),
                spgw_ipv4: "128.0.0.1".into(),
            },
        );

        map.set("IMSI1", &session).expect("stored");
        let loaded = map.get("IMSI1").expect("loaded");
        assert_eq!(loaded.sid(), "IMSI1");
        assert_eq!(loaded.session_id(), "1234");
        assert_eq!(loaded.config().ue_ipv4, "127.0.0.1");
    }

    #[test]
    fn missing_key_reports_not_found() {
        let map: MemoryObjectMap<SessionState> = MemoryObjectMap::json();
        assert_eq!(map.get("IMSI9").unwrap_err(), StoreError::KeyNotFound);
    }

    #[test]
    fn get_all_skips_undecodable_entries() {
        let map: MemoryObjectMap<u64> = MemoryObjectMap::new(
            Box::new(|value: &u64| Ok(value.to_string())),
            Box::new(|raw: &str| {
                if raw == "13" {
                    Err(StoreError::Deserialize)
                } else {
                    raw.parse().map_err(|_| StoreError::Deserialize)
                }
            }),
        );
        map.set("a", &7).expect("stored");
        map.set("b", &13).expect("stored");
        map.set("c", &21).expect("stored");

        let mut values = map.get_all().expect("read");
        values.sort_unstable();
        assert_eq!(values, vec![7, 21]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn failing_serializer_propagates() {
        let map: MemoryObjectMap<u64> = MemoryObjectMap::new(
            Box::new(|_: &u64| Err(StoreError::Serialize)),
            Box::new(|_: &str| Err(StoreError::Deserialize)),
        );
        assert_eq!(map.set("a", &1).unwrap_err(), StoreError::Serialize);
        assert!(map.is_empty());
    }
}
