use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;

/// Raw key/value access shared by every store implementation.
///
/// All operations are synchronous and durable once they return.
pub trait StoreBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete several keys as one write. Returns how many existed.
    fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.contains(key) {
                self.delete(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn contains(&self, key: &str) -> bool;
    fn all_keys(&self) -> Vec<String>;
    fn clear_all(&self) -> Result<(), StoreError>;
}

/// Process-local store with no persistence, used for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StoreBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut entries = self.entries();
        Ok(keys.iter().filter(|key| entries.remove(*key).is_some()).count())
    }

    fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn all_keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        self.entries().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_basic_operations() {
        let store = MemoryBackend::new();
        store.set("b", "2").unwrap();
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").as_deref(), Some("1"));
        assert!(store.contains("b"));
        assert_eq!(store.all_keys(), vec!["a", "b"]);

        store.delete("a").unwrap();
        assert!(!store.contains("a"));

        store.set("c", "3").unwrap();
        assert_eq!(store.delete_many(&["b".to_string(), "z".to_string()]).unwrap(), 1);
        assert_eq!(store.all_keys(), vec!["c"]);

        store.clear_all().unwrap();
        assert!(store.all_keys().is_empty());
    }

    #[test]
    fn test_memory_backend_last_set_wins() {
        let store = MemoryBackend::new();
        store.set("k", "first").unwrap();
        store.set("k", "second").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("second"));
    }
}
