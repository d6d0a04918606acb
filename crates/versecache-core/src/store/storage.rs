use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::backend::{MemoryBackend, StoreBackend};
use super::encrypted::EncryptedFileBackend;
use super::key_source::KeySource;
use crate::error::StoreError;

/// Serialized forms of absent values left behind by earlier serialization bugs.
const SENTINELS: [&str; 2] = ["undefined", "null"];

pub(crate) fn is_sentinel(raw: &str) -> bool {
    SENTINELS.contains(&raw.trim())
}

/// Handle to the process-wide persistent store.
///
/// Built once at startup and cloned into the TTL cache, history lists and the
/// orchestrator. Typed getters evict values they cannot read and report them
/// as absent.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StoreBackend>,
}

impl Storage {
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_arc(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn open_encrypted(path: impl Into<PathBuf>, key_source: &KeySource) -> Result<Self> {
        let path = path.into();
        // An existing file must be opened with the key it was written with.
        let passphrase = if path.exists() {
            key_source.existing()?
        } else {
            key_source.resolve()?
        };
        let backend = EncryptedFileBackend::open(&path, &passphrase)
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        Ok(Self::new(backend))
    }

    // ===== Raw access =====

    pub fn get(&self, key: &str) -> Option<String> {
        self.backend.get(key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.backend.set(key, value)
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.backend.delete(key)
    }

    /// Delete `keys` in one write. Returns how many existed.
    pub fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        self.backend.delete_many(keys)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.backend.contains(key)
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.backend.all_keys()
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.backend.clear_all()
    }

    /// Drop a record that could not be read. Failures are logged, not returned.
    pub(crate) fn evict(&self, key: &str, reason: &str) {
        match self.backend.delete(key) {
            Ok(()) => debug!(key, reason, "Evicted unreadable record"),
            Err(e) => warn!(key, reason, error = %e, "Failed to evict unreadable record"),
        }
    }

    // ===== Typed access =====

    pub fn get_string(&self, key: &str) -> Option<String> {
        let raw = self.backend.get(key)?;
        if is_sentinel(&raw) {
            warn!(key, "Found corruption sentinel in store");
            self.evict(key, "sentinel");
            return None;
        }
        Some(raw)
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        let raw = self.get_string(key)?;
        match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Some(n),
            _ => {
                self.evict(key, "not a number");
                None
            }
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let raw = self.get_string(key)?;
        match raw.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => {
                self.evict(key, "not a boolean");
                None
            }
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_string(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "Stored value does not match requested shape");
                self.evict(key, "unparseable json");
                None
            }
        }
    }

    /// Store a string. Sentinel strings are never committed; the key is deleted instead.
    pub fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if is_sentinel(value) {
            warn!(key, "Refusing to store sentinel value, deleting key");
            return self.backend.delete(key);
        }
        self.backend.set(key, value)
    }

    pub fn set_number(&self, key: &str, value: f64) -> Result<(), StoreError> {
        if !value.is_finite() {
            return self.backend.delete(key);
        }
        self.backend.set(key, &value.to_string())
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.backend.set(key, if value { "true" } else { "false" })
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set_string(key, &raw)
    }
}
