use std::sync::Arc;

use serde::{de::IgnoredAny, de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::codec::{Codec, JsonCodec};
use super::entry::{CacheEntry, Ttl};
use crate::clock::Clock;
use crate::error::{CodecError, StoreError};
use crate::store::Storage;

/// Prefix for cache records inside the store. Settings and history live
/// beside them unprefixed and are never touched by the sweep.
pub const CACHE_PREFIX: &str = "cache:";

/// Expiring key/value cache on top of the persistent store.
///
/// Expiry is lazy: `get` is the only place an entry is judged, and an
/// expired or unreadable entry is deleted as it is read.
#[derive(Clone)]
pub struct TtlCache<C = JsonCodec> {
    storage: Storage,
    clock: Arc<dyn Clock>,
    codec: C,
}

impl TtlCache<JsonCodec> {
    pub fn new(storage: Storage, clock: Arc<dyn Clock>) -> Self {
        Self::with_codec(storage, clock, JsonCodec)
    }
}

impl<C: Codec> TtlCache<C> {
    pub fn with_codec(storage: Storage, clock: Arc<dyn Clock>, codec: C) -> Self {
        Self {
            storage,
            clock,
            codec,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn record_key(key: &str) -> String {
        format!("{}{}", CACHE_PREFIX, key)
    }

    /// Store `value` under `key` for `ttl`. A value that encodes as absent
    /// deletes the key instead.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Ttl) -> Result<(), StoreError> {
        match self.codec.encode(value, self.now(), ttl) {
            Ok(raw) => {
                self.storage.set(&Self::record_key(key), &raw)?;
                debug!(key, ttl_ms = ttl.as_millis(), "Cached value");
                Ok(())
            }
            Err(CodecError::Absent) => {
                debug!(key, "Absent value written, deleting entry");
                self.delete(key)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like `set`, but keeps an existing live entry written at or after
    /// `started_at`. Returns whether the value was committed.
    pub fn set_if_newer<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Ttl,
        started_at: i64,
    ) -> Result<bool, StoreError> {
        if let Some(existing) = self.get_entry::<IgnoredAny>(key) {
            if existing.timestamp >= started_at {
                debug!(key, started_at, written_at = existing.timestamp, "Newer entry exists, dropping result");
                return Ok(false);
            }
        }
        self.set(key, value, ttl)?;
        Ok(true)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// The live entry for `key` with its timestamp and ttl.
    pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let record = Self::record_key(key);
        let raw = self.storage.get(&record)?;

        let entry = match self.codec.decode::<T>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Evicting corrupt cache entry");
                self.storage.evict(&record, "corrupt cache entry");
                return None;
            }
        };

        if entry.is_expired(self.now()) {
            debug!(key, "Cache entry expired");
            self.storage.evict(&record, "expired");
            return None;
        }
        Some(entry)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get_entry::<IgnoredAny>(key).is_some()
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.storage.delete(&Self::record_key(key))
    }

    /// Cache keys currently in the store, expired or not.
    pub fn keys(&self) -> Vec<String> {
        self.storage
            .all_keys()
            .into_iter()
            .filter_map(|record| record.strip_prefix(CACHE_PREFIX).map(str::to_string))
            .collect()
    }

    /// Evict every cache entry that is expired or unreadable. Live entries
    /// are left untouched. Returns how many records were removed.
    pub fn clear_expired(&self) -> usize {
        let now = self.now();
        let doomed: Vec<String> = self
            .storage
            .all_keys()
            .into_iter()
            .filter(|record| record.starts_with(CACHE_PREFIX))
            .filter(|record| {
                self.storage.get(record).is_some_and(|raw| {
                    !matches!(
                        self.codec.decode::<IgnoredAny>(&raw),
                        Ok(entry) if !entry.is_expired(now)
                    )
                })
            })
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        match self.storage.delete_many(&doomed) {
            Ok(removed) => {
                info!(removed, "Swept expired cache entries");
                removed
            }
            Err(e) => {
                warn!(error = %e, candidates = doomed.len(), "Failed to sweep expired cache entries");
                0
            }
        }
    }

    /// Remove every cache entry, leaving other store keys alone.
    pub fn clear(&self) -> Result<(), StoreError> {
        let records: Vec<String> = self.keys().iter().map(|key| Self::record_key(key)).collect();
        self.storage.delete_many(&records)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (TtlCache, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let cache = TtlCache::new(Storage::in_memory(), Arc::new(clock.clone()));
        (cache, clock)
    }

    #[test]
    fn test_get_within_ttl_then_expire() {
        let (cache, clock) = cache();
        cache.set("reviews-surah-1", &vec!["great"], Ttl::from_millis(1_000)).unwrap();

        assert_eq!(cache.get::<Vec<String>>("reviews-surah-1"), Some(vec!["great".to_string()]));

        clock.advance(1_000);
        assert!(cache.has("reviews-surah-1"));

        clock.advance(1);
        assert_eq!(cache.get::<Vec<String>>("reviews-surah-1"), None);
        // Lazy eviction removed the record.
        assert!(cache.storage().all_keys().is_empty());
    }

    #[test]
    fn test_zero_ttl_misses_immediately() {
        let (cache, _) = cache();
        cache.set("k", &42, Ttl::ZERO).unwrap();
        assert_eq!(cache.get::<i32>("k"), None);
    }

    #[test]
    fn test_negative_ttl_behaves_as_zero() {
        let (cache, _) = cache();
        cache.set("k", &42, Ttl::from_millis(-10_000)).unwrap();
        assert!(!cache.has("k"));
    }

    #[test]
    fn test_absent_value_is_implicit_delete() {
        let (cache, _) = cache();
        cache.set("k", &"present", Ttl::NEVER).unwrap();
        cache.set("k", &Option::<String>::None, Ttl::NEVER).unwrap();
        assert!(!cache.has("k"));
        assert!(cache.storage().all_keys().is_empty());
    }

    #[test]
    fn test_corrupt_entries_are_evicted_on_read() {
        let (cache, _) = cache();
        let storage = cache.storage().clone();
        storage.set("cache:a", "undefined").unwrap();
        storage.set("cache:b", r#"{"data": 1, "ttl": 10}"#).unwrap();
        storage.set("cache:c", "{truncated").unwrap();

        for key in ["a", "b", "c"] {
            assert_eq!(cache.get::<i32>(key), None);
        }
        assert!(storage.all_keys().is_empty());
    }

    #[test]
    fn test_wrong_type_is_treated_as_corrupt() {
        let (cache, _) = cache();
        cache.set("k", &"text", Ttl::NEVER).unwrap();
        assert_eq!(cache.get::<u32>("k"), None);
        assert!(!cache.storage().contains("cache:k"));
    }

    #[test]
    fn test_clear_expired_keeps_live_entries_byte_for_byte() {
        let (cache, clock) = cache();
        let storage = cache.storage().clone();
        cache.set("short", &1, Ttl::from_millis(10)).unwrap();
        cache.set("long", &vec![1, 2, 3], Ttl::from_mins(5)).unwrap();
        cache.set("forever", &"scripture", Ttl::NEVER).unwrap();
        storage.set("cache:broken", "null").unwrap();
        storage.set_string("theme", "dark").unwrap();

        let long_before = storage.get("cache:long").unwrap();
        let forever_before = storage.get("cache:forever").unwrap();

        clock.advance(11);
        assert_eq!(cache.clear_expired(), 2);

        assert_eq!(storage.get("cache:long").unwrap(), long_before);
        assert_eq!(storage.get("cache:forever").unwrap(), forever_before);
        assert!(!storage.contains("cache:short"));
        assert!(!storage.contains("cache:broken"));
        assert_eq!(storage.get_string("theme").as_deref(), Some("dark"));
    }

    /// Memory store that counts mutating calls.
    #[derive(Default)]
    struct CountingBackend {
        inner: crate::store::MemoryBackend,
        deletes: std::sync::atomic::AtomicUsize,
        batches: std::sync::atomic::AtomicUsize,
    }

    impl crate::store::StoreBackend for CountingBackend {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value)
        }
        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.deletes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.delete(key)
        }
        fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
            self.batches.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.delete_many(keys)
        }
        fn contains(&self, key: &str) -> bool {
            self.inner.contains(key)
        }
        fn all_keys(&self) -> Vec<String> {
            self.inner.all_keys()
        }
        fn clear_all(&self) -> Result<(), StoreError> {
            self.inner.clear_all()
        }
    }

    #[test]
    fn test_clear_expired_writes_once() {
        use std::sync::atomic::Ordering;

        let backend = Arc::new(CountingBackend::default());
        let clock = ManualClock::new(1_700_000_000_000);
        let cache = TtlCache::new(Storage::from_arc(backend.clone()), Arc::new(clock.clone()));
        for n in 0..5 {
            cache.set(&format!("reviews-surah-{}", n), &n, Ttl::from_millis(10)).unwrap();
        }
        cache.set("quran-chapters", &"index", Ttl::NEVER).unwrap();

        clock.advance(11);
        assert_eq!(cache.clear_expired(), 5);
        assert_eq!(backend.batches.load(Ordering::SeqCst), 1);
        assert_eq!(backend.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(cache.keys(), vec!["quran-chapters"]);

        assert_eq!(cache.clear_expired(), 0);
        assert_eq!(backend.batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_if_newer_respects_later_write() {
        let (cache, clock) = cache();
        let started_at = cache.now();

        clock.advance(5);
        cache.set("k", &"user edit", Ttl::NEVER).unwrap();

        clock.advance(5);
        let committed = cache.set_if_newer("k", &"fetched", Ttl::NEVER, started_at).unwrap();
        assert!(!committed);
        assert_eq!(cache.get::<String>("k").as_deref(), Some("user edit"));
    }

    #[test]
    fn test_set_if_newer_replaces_older_entry() {
        let (cache, clock) = cache();
        cache.set("k", &"old", Ttl::NEVER).unwrap();

        clock.advance(5);
        let started_at = cache.now();
        clock.advance(5);
        assert!(cache.set_if_newer("k", &"new", Ttl::NEVER, started_at).unwrap());
        assert_eq!(cache.get::<String>("k").as_deref(), Some("new"));
    }

    #[test]
    fn test_keys_and_clear_only_touch_cache_records() {
        let (cache, _) = cache();
        cache.set("a", &1, Ttl::NEVER).unwrap();
        cache.set("b", &2, Ttl::NEVER).unwrap();
        cache.storage().set_bool("__migration_v1_complete", true).unwrap();

        assert_eq!(cache.keys(), vec!["a", "b"]);
        cache.clear().unwrap();
        assert!(cache.keys().is_empty());
        assert_eq!(cache.storage().get_bool("__migration_v1_complete"), Some(true));
    }

    #[test]
    fn test_entry_exposes_timestamp() {
        let (cache, clock) = cache();
        let written_at = cache.now();
        cache.set("k", &"v", Ttl::from_secs(60)).unwrap();
        clock.advance(30_000);

        let entry = cache.get_entry::<String>("k").unwrap();
        assert_eq!(entry.timestamp, written_at);
        assert_eq!(entry.age_display(cache.now()), "30s ago");
    }
}
