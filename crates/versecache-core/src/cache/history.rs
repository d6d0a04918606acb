use tracing::debug;

use crate::error::StoreError;
use crate::store::Storage;

/// Searches remembered by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 3;

/// Most-recent-first list of strings persisted as one JSON array.
///
/// Re-adding an existing value moves it to the front; the oldest value
/// falls off once the list is full.
#[derive(Clone)]
pub struct RecentHistory {
    storage: Storage,
    key: String,
    limit: usize,
}

impl RecentHistory {
    pub fn new(storage: Storage, key: impl Into<String>) -> Self {
        Self::with_limit(storage, key, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_limit(storage: Storage, key: impl Into<String>, limit: usize) -> Self {
        Self {
            storage,
            key: key.into(),
            limit: limit.max(1),
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.storage
            .get_json::<Vec<String>>(&self.key)
            .unwrap_or_default()
    }

    /// Record `value` as the most recent entry and return the updated list.
    pub fn push(&self, value: &str) -> Result<Vec<String>, StoreError> {
        let value = value.trim();
        let mut entries = self.entries();
        if value.is_empty() {
            return Ok(entries);
        }

        entries.retain(|existing| existing != value);
        entries.insert(0, value.to_string());
        entries.truncate(self.limit);

        self.storage.set_json(&self.key, &entries)?;
        debug!(key = %self.key, len = entries.len(), "Recorded history entry");
        Ok(entries)
    }

    pub fn remove(&self, value: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries();
        entries.retain(|existing| existing != value);
        self.storage.set_json(&self.key, &entries)?;
        Ok(entries)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.storage.delete(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> RecentHistory {
        RecentHistory::new(Storage::in_memory(), "recent-searches")
    }

    #[test]
    fn test_newest_first() {
        let history = history();
        history.push("mercy").unwrap();
        history.push("patience").unwrap();
        assert_eq!(history.entries(), vec!["patience", "mercy"]);
    }

    #[test]
    fn test_duplicate_moves_to_front_without_growing() {
        let history = history();
        history.push("light").unwrap();
        history.push("mercy").unwrap();
        history.push("patience").unwrap();

        let entries = history.push("light").unwrap();
        assert_eq!(entries, vec!["light", "patience", "mercy"]);
        assert_eq!(history.entries().len(), 3);
    }

    #[test]
    fn test_oldest_entry_is_evicted_past_limit() {
        let history = history();
        for term in ["one", "two", "three", "four"] {
            history.push(term).unwrap();
        }
        assert_eq!(history.entries(), vec!["four", "three", "two"]);
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let history = history();
        history.push("  ").unwrap();
        history.push(" light ").unwrap();
        assert_eq!(history.entries(), vec!["light"]);
    }

    #[test]
    fn test_corrupt_history_starts_fresh() {
        let storage = Storage::in_memory();
        storage.set("recent-searches", "undefined").unwrap();
        let history = RecentHistory::new(storage.clone(), "recent-searches");

        assert!(history.entries().is_empty());
        history.push("light").unwrap();
        assert_eq!(history.entries(), vec!["light"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let history = history();
        history.push("a").unwrap();
        history.push("b").unwrap();
        assert_eq!(history.remove("a").unwrap(), vec!["b"]);
        history.clear().unwrap();
        assert!(history.entries().is_empty());
    }
}
