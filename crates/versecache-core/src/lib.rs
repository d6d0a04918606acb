//! Core library for versecache.
//!
//! Layers, bottom to top:
//!
//! - `store`: encrypted persistent key-value store
//! - `cache`: TTL cache and recent-history lists over the store
//! - `query`: in-memory query cache with single-flight fetches and retries
//! - `orchestrator`: cache-aside domain reads (chapters, index, reviews)
//! - `migration`: one-time import of the legacy unencrypted store

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod migration;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod store;

pub use api::{ApiClient, ContentSource};
pub use cache::{CacheEntry, RecentHistory, Ttl, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use connectivity::{Connectivity, NetworkStatus};
pub use error::{CodecError, FetchError, StoreError};
pub use migration::{migrate_legacy, JsonFileLegacySource, LegacySource, MigrationReport};
pub use orchestrator::Orchestrator;
pub use query::{QueryClient, QueryKey, QueryObserver, QueryOptions, QueryState, StalePolicy};
pub use store::{KeySource, Storage};
