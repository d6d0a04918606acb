//! Reactive in-memory query cache.
//!
//! Queries are addressed by `QueryKey` and resolved through a fetcher
//! closure. Concurrent requests for one key share a single fetch, transient
//! failures are retried with exponential backoff while online, and entries
//! nobody observes are dropped after their GC time.

pub mod client;
pub mod key;
pub mod observer;
pub mod options;

pub use client::QueryClient;
pub use key::QueryKey;
pub use observer::{QueryObserver, QueryState};
pub use options::{QueryOptions, StalePolicy, DEFAULT_GC_TIME, DEFAULT_RETRY};
