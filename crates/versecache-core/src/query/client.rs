//! In-memory query cache with single-flight fetches.
//!
//! Every key maps to one `QueryEntry` holding the last value, the fetcher
//! that produces it and at most one in-flight fetch. Fetches run on spawned
//! tasks so they finish (and land in the cache) even if every caller that
//! was waiting on them goes away. Callers waiting on the same key share one
//! `Shared` future.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::key::QueryKey;
use super::observer::QueryObserver;
use super::options::{QueryOptions, StalePolicy};
use crate::connectivity::Connectivity;
use crate::error::FetchError;

pub(crate) type Erased = Arc<dyn Any + Send + Sync>;
type ErasedResult = Result<Erased, FetchError>;
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, ErasedResult> + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, ErasedResult>>;

/// Delay before the first retry. Doubles on each further attempt.
const INITIAL_RETRY_DELAY_MS: u64 = 1000;

/// Upper bound for the retry delay.
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// What observers of an entry are sent.
#[derive(Clone, Default)]
pub(crate) struct Snapshot {
    pub data: Option<Erased>,
    pub is_fetching: bool,
    pub error: Option<FetchError>,
}

struct InFlight {
    /// Commit sequence number taken when the fetch started.
    started: u64,
    /// Nobody waits on the outcome: a failure is logged, not recorded.
    silent: bool,
    future: SharedFetch,
}

impl InFlight {
    /// Hand out the shared future to a caller that cares about the outcome.
    fn join(&mut self) -> SharedFetch {
        self.silent = false;
        self.future.clone()
    }
}

enum Lookup {
    Fresh(Erased),
    Stale(Erased),
    Missing,
}

struct QueryEntry {
    /// Distinguishes this entry from earlier ones removed under the same key.
    generation: u64,
    data: Option<Erased>,
    /// Sequence number of the commit that produced `data`.
    committed: u64,
    updated_at: Option<Instant>,
    invalidated: bool,
    /// Sequence number of the last `invalidate_query`.
    invalidated_at: u64,
    error: Option<FetchError>,
    options: QueryOptions,
    fetcher: Option<ErasedFetcher>,
    in_flight: Option<InFlight>,
    subscribers: usize,
    idle_since: Instant,
    tx: watch::Sender<Snapshot>,
}

impl QueryEntry {
    fn new(generation: u64, options: QueryOptions, now: Instant) -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self {
            generation,
            data: None,
            committed: 0,
            updated_at: None,
            invalidated: false,
            invalidated_at: 0,
            error: None,
            options,
            fetcher: None,
            in_flight: None,
            subscribers: 0,
            idle_since: now,
            tx,
        }
    }

    fn stale_deadline(&self) -> Option<Instant> {
        let updated_at = self.updated_at?;
        self.options
            .stale_time
            .and_then(|stale_time| updated_at.checked_add(stale_time))
    }

    /// `None` while observed or fetching.
    fn gc_deadline(&self) -> Option<Instant> {
        if self.subscribers > 0 || self.in_flight.is_some() {
            return None;
        }
        self.options
            .gc_time
            .and_then(|gc_time| self.idle_since.checked_add(gc_time))
    }

    fn lookup(&self, now: Instant) -> Lookup {
        let Some(data) = &self.data else {
            return Lookup::Missing;
        };
        let stale = self.invalidated
            || self
                .stale_deadline()
                .is_some_and(|deadline| deadline <= now);
        if stale {
            Lookup::Stale(Arc::clone(data))
        } else {
            Lookup::Fresh(Arc::clone(data))
        }
    }

    fn commit(&mut self, data: Erased, sequence: u64, now: Instant) {
        self.data = Some(data);
        self.committed = sequence;
        self.updated_at = Some(now);
        self.invalidated = false;
        self.error = None;
    }

    fn publish(&self) {
        self.tx.send_replace(Snapshot {
            data: self.data.clone(),
            is_fetching: self.in_flight.is_some(),
            error: self.error.clone(),
        });
    }
}

/// Process-wide query cache. Cheap to clone; clones share state.
///
/// Fetches are spawned with `tokio::spawn`, so methods that may start one
/// must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

struct Inner {
    entries: Mutex<HashMap<QueryKey, QueryEntry>>,
    connectivity: Arc<dyn Connectivity>,
    sequence: AtomicU64,
}

impl QueryClient {
    pub fn new(connectivity: Arc<dyn Connectivity>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                connectivity,
                sequence: AtomicU64::new(0),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, QueryEntry>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Resolve `key`: fresh data is returned as-is, an in-flight fetch is
    /// joined, otherwise `fetcher` runs (with retries).
    ///
    /// Stale data follows `options.stale_policy`.
    pub async fn fetch_query<T, F, Fut>(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: F,
    ) -> Result<Arc<T>, FetchError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let fetcher = erase(fetcher);
        let pending = {
            let now = Instant::now();
            let mut entries = self.entries();
            collect_expired(&mut entries, now);
            let entry = self.entry_for(&mut entries, key, options, now);
            entry.options = options.clone();
            entry.fetcher = Some(Arc::clone(&fetcher));

            match entry.lookup(now) {
                Lookup::Fresh(data) => {
                    debug!(%key, "Query cache hit");
                    return downcast(key, data);
                }
                Lookup::Stale(data) if options.stale_policy == StalePolicy::ServeStale => {
                    match &mut entry.in_flight {
                        Some(in_flight) => in_flight.silent = false,
                        None => {
                            debug!(%key, "Serving stale data while revalidating");
                            self.spawn_fetch(key, entry, fetcher, false);
                        }
                    }
                    return downcast(key, data);
                }
                Lookup::Stale(_) | Lookup::Missing => {}
            }

            match &mut entry.in_flight {
                Some(in_flight) => {
                    debug!(%key, "Joining in-flight fetch");
                    in_flight.join()
                }
                None => self.start_fetch(key, entry, fetcher, false),
            }
        };

        let data = pending.await?;
        downcast(key, data)
    }

    /// Start a background fetch for `key` unless its data is fresh or a fetch
    /// is already running. Failures are logged and otherwise ignored.
    pub fn prefetch_query<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetcher: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let now = Instant::now();
        let mut entries = self.entries();
        collect_expired(&mut entries, now);
        let entry = self.entry_for(&mut entries, key, options, now);

        if entry.in_flight.is_some() || matches!(entry.lookup(now), Lookup::Fresh(_)) {
            debug!(%key, "Prefetch already satisfied");
            return;
        }

        let fetcher = erase(fetcher);
        entry.options = options.clone();
        entry.fetcher = Some(Arc::clone(&fetcher));
        debug!(%key, "Prefetching");
        self.spawn_fetch(key, entry, fetcher, true);
    }

    /// Observe `key`. The returned observer tracks data, loading state and
    /// errors; dropping it unsubscribes.
    pub fn subscribe<T, F, Fut>(
        &self,
        key: QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> QueryObserver<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let now = Instant::now();
        let mut entries = self.entries();
        collect_expired(&mut entries, now);
        let entry = self.entry_for(&mut entries, &key, &options, now);

        let fetcher = erase(fetcher);
        entry.fetcher = Some(Arc::clone(&fetcher));
        entry.subscribers += 1;
        let generation = entry.generation;
        let receiver = entry.tx.subscribe();

        let needs_fetch = !matches!(entry.lookup(now), Lookup::Fresh(_));
        let enabled = options.enabled;
        entry.options = options;
        if let Some(in_flight) = &mut entry.in_flight {
            in_flight.silent = false;
        } else if enabled && needs_fetch {
            self.spawn_fetch(&key, entry, fetcher, false);
        }
        drop(entries);

        QueryObserver::new(self.clone(), key, generation, receiver)
    }

    /// Release a subscription taken on entry `generation` of `key`. No-op if
    /// that entry has since been removed.
    pub(crate) fn unsubscribe(&self, key: &QueryKey, generation: u64) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key).filter(|entry| entry.generation == generation) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.idle_since = Instant::now();
                debug!(%key, "Last subscriber left");
            }
        }
    }

    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        let mut entries = self.entries();
        collect_expired(&mut entries, Instant::now());
        let data = entries.get(key)?.data.clone()?;
        data.downcast::<T>().ok()
    }

    /// Seed `key` with a value. Counts as a write: a fetch that was already
    /// running for the key will not replace it.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, value: T) -> Arc<T> {
        self.set_query_data_with(key, value, &QueryOptions::default())
    }

    /// `set_query_data`, using `options` if the entry does not exist yet.
    pub fn set_query_data_with<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
        value: T,
        options: &QueryOptions,
    ) -> Arc<T> {
        let value = Arc::new(value);
        let erased: Erased = value.clone();
        let now = Instant::now();
        let sequence = self.next_sequence();

        let mut entries = self.entries();
        let entry = self.entry_for(&mut entries, key, options, now);
        entry.commit(erased, sequence, now);
        entry.publish();
        debug!(%key, "Seeded query data");
        value
    }

    /// Mark `key` stale. Observed queries refetch right away; others on
    /// their next access. A fetch already running when this is called does
    /// not count as fresh: observed queries fetch again once it lands.
    pub fn invalidate_query(&self, key: &QueryKey) {
        let sequence = self.next_sequence();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.invalidated = true;
        entry.invalidated_at = sequence;
        debug!(%key, "Invalidated query");
        if entry.subscribers > 0 {
            self.refetch_entry(key, entry);
        }
    }

    /// Run the stored fetcher for `key` now. Returns whether a fetch is running.
    pub fn refetch(&self, key: &QueryKey) -> bool {
        let mut entries = self.entries();
        match entries.get_mut(key) {
            Some(entry) => self.refetch_entry(key, entry),
            None => false,
        }
    }

    fn refetch_entry(&self, key: &QueryKey, entry: &mut QueryEntry) -> bool {
        if let Some(in_flight) = &mut entry.in_flight {
            in_flight.silent = false;
            return true;
        }
        if !entry.options.enabled {
            return false;
        }
        let Some(fetcher) = entry.fetcher.clone() else {
            return false;
        };
        self.spawn_fetch(key, entry, fetcher, false);
        true
    }

    /// Drop the in-memory entry. A running fetch still completes but its
    /// result is not stored. Existing observers see their channel close and
    /// no longer count towards any later entry for the key.
    pub fn remove_query(&self, key: &QueryKey) -> bool {
        self.entries().remove(key).is_some()
    }

    /// Evict unobserved entries whose GC deadline has passed.
    pub fn collect_garbage(&self) -> usize {
        collect_expired(&mut self.entries(), Instant::now())
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.entries()
            .get(key)
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    /// Error from the last failed fetch, if no fetch has succeeded since.
    pub fn query_error(&self, key: &QueryKey) -> Option<FetchError> {
        self.entries().get(key).and_then(|entry| entry.error.clone())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entry_for<'a>(
        &self,
        entries: &'a mut HashMap<QueryKey, QueryEntry>,
        key: &QueryKey,
        options: &QueryOptions,
        now: Instant,
    ) -> &'a mut QueryEntry {
        entries
            .entry(key.clone())
            .or_insert_with(|| QueryEntry::new(self.next_sequence(), options.clone(), now))
    }

    /// `start_fetch` for callers that do not wait on the result.
    fn spawn_fetch(&self, key: &QueryKey, entry: &mut QueryEntry, fetcher: ErasedFetcher, silent: bool) {
        drop(self.start_fetch(key, entry, fetcher, silent));
    }

    fn start_fetch(
        &self,
        key: &QueryKey,
        entry: &mut QueryEntry,
        fetcher: ErasedFetcher,
        silent: bool,
    ) -> SharedFetch {
        let started = self.next_sequence();
        let generation = entry.generation;
        let retry = entry.options.retry;

        let client = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(client.run_with_retry(&task_key, fetcher, retry))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!(key = %task_key, "Fetcher panicked");
                    Err(FetchError::Aborted(task_key.to_string()))
                });
            client.settle(&task_key, generation, started, result)
        });

        let join_key = key.clone();
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(key = %join_key, error = %e, "Fetch task did not complete");
                    Err(FetchError::Aborted(join_key.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight {
            started,
            silent,
            future: future.clone(),
        });
        entry.publish();
        future
    }

    async fn run_with_retry(&self, key: &QueryKey, fetcher: ErasedFetcher, retry: u32) -> ErasedResult {
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_RETRY_DELAY_MS;

        loop {
            let error = match fetcher().await {
                Ok(data) => return Ok(data),
                Err(e) => e,
            };
            if attempt >= retry || !error.is_retryable() {
                return Err(error);
            }
            if !self.inner.connectivity.is_online() {
                debug!(%key, "Offline, not retrying");
                return Err(error);
            }

            attempt += 1;
            warn!(%key, attempt, backoff_ms, error = %error, "Fetch failed, retrying");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(MAX_RETRY_DELAY_MS);
        }
    }

    /// Record a finished fetch and release the in-flight slot.
    fn settle(&self, key: &QueryKey, generation: u64, started: u64, result: ErasedResult) -> ErasedResult {
        let now = Instant::now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key).filter(|entry| entry.generation == generation) else {
            debug!(%key, "Query removed while fetching, dropping result");
            return result;
        };

        let mut silent = false;
        if entry.in_flight.as_ref().is_some_and(|f| f.started == started) {
            silent = entry.in_flight.take().is_some_and(|f| f.silent) && entry.subscribers == 0;
        }

        let outcome = match result {
            Ok(data) if entry.committed > started => {
                debug!(%key, "Newer data was written during the fetch, keeping it");
                Ok(entry.data.clone().unwrap_or(data))
            }
            Ok(data) => {
                let sequence = self.next_sequence();
                entry.commit(Arc::clone(&data), sequence, now);
                if entry.invalidated_at > started {
                    debug!(%key, "Invalidated during the fetch, result is already stale");
                    entry.invalidated = true;
                    if entry.subscribers > 0 && entry.options.enabled {
                        if let Some(fetcher) = entry.fetcher.clone() {
                            self.spawn_fetch(key, entry, fetcher, false);
                        }
                    }
                }
                Ok(data)
            }
            Err(e) => {
                if silent {
                    debug!(%key, error = %e, "Prefetch failed");
                } else {
                    entry.error = Some(e.clone());
                }
                Err(e)
            }
        };

        if entry.subscribers == 0 {
            entry.idle_since = now;
        }
        entry.publish();
        outcome
    }
}

fn collect_expired(entries: &mut HashMap<QueryKey, QueryEntry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|key, entry| {
        let keep = entry.gc_deadline().map_or(true, |deadline| deadline > now);
        if !keep {
            debug!(%key, "Garbage-collected query");
        }
        keep
    });
    before - entries.len()
}

fn erase<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = fetcher();
        async move { fut.await.map(|value| Arc::new(value) as Erased) }.boxed()
    })
}

pub(crate) fn downcast<T: Send + Sync + 'static>(
    key: &QueryKey,
    data: Erased,
) -> Result<Arc<T>, FetchError> {
    data.downcast::<T>()
        .map_err(|_| FetchError::TypeMismatch(key.to_string()))
}
