//! TTL cache over the persistent store.
//!
//! This module provides the `TtlCache` for storing domain payloads with an
//! expiry, plus the `RecentHistory` list used for search history.
//!
//! Entries are `{data, timestamp, ttl}` records encoded by a swappable
//! `Codec` and kept under the `cache:` key prefix. Expired and corrupt
//! entries are deleted when read or during `clear_expired`.

pub mod codec;
pub mod entry;
pub mod history;
pub mod manager;

pub use codec::{Codec, JsonCodec};
pub use entry::{CacheEntry, Ttl};
pub use history::{RecentHistory, DEFAULT_HISTORY_LIMIT};
pub use manager::{TtlCache, CACHE_PREFIX};
