//! Cache-aside orchestration of the domain fetches.
//!
//! Every domain read goes through the query cache (single-flight, retry,
//! in-memory staleness) and, inside the query's fetcher, through the TTL
//! cache before touching the network:
//!
//! 1. a live TTL entry is returned without a network call
//! 2. a live `<key>:missing` record short-circuits to `NotFound`
//! 3. offline with nothing cached fails fast with `OfflineNoCache`
//! 4. otherwise the remote source is called, the payload validated and the
//!    result persisted (unless a newer write or an invalidation landed
//!    during the fetch)

pub mod keys;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::api::ContentSource;
use crate::cache::{RecentHistory, Ttl, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::connectivity::Connectivity;
use crate::error::{FetchError, StoreError};
use crate::models::chapter::is_valid_chapter;
use crate::models::{Chapter, ChapterSummary, Review, Validate};
use crate::query::{QueryClient, QueryKey, QueryObserver, QueryOptions, StalePolicy, DEFAULT_GC_TIME};
use crate::store::Storage;

/// How long reviews stay in the persistent cache.
pub const REVIEWS_TTL: Ttl = Ttl::from_mins(5);

/// How long reviews stay fresh in memory before a background refetch.
pub const REVIEWS_STALE_TIME: Duration = Duration::from_secs(60);

/// How long a not-found answer is remembered.
pub const NEGATIVE_TTL: Ttl = Ttl::from_mins(5);

type BoxFetch<T> = BoxFuture<'static, Result<T, FetchError>>;

/// Entry point for domain reads. Cheap to clone; clones share caches.
pub struct Orchestrator<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    cache: TtlCache,
    query: QueryClient,
    history: RecentHistory,
    source: S,
    connectivity: Arc<dyn Connectivity>,
    /// Bumped per record key by each invalidation.
    epochs: Mutex<HashMap<String, u64>>,
}

impl<S> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ContentSource> Orchestrator<S> {
    pub fn new(storage: Storage, source: S, connectivity: Arc<dyn Connectivity>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock), source, connectivity)
    }

    pub fn with_clock(
        storage: Storage,
        clock: Arc<dyn Clock>,
        source: S,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache: TtlCache::new(storage.clone(), clock),
                query: QueryClient::new(Arc::clone(&connectivity)),
                history: RecentHistory::new(storage, keys::RECENT_SEARCHES),
                source,
                connectivity,
                epochs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cache(&self) -> &TtlCache {
        &self.inner.cache
    }

    pub fn query_client(&self) -> &QueryClient {
        &self.inner.query
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    pub fn recent_searches(&self) -> &RecentHistory {
        &self.inner.history
    }

    // ===== Chapters =====

    /// Full text of a chapter. Resolving it prefetches its neighbours.
    pub async fn chapter(&self, number: u16, edition: &str) -> Result<Arc<Chapter>, FetchError> {
        if !is_valid_chapter(number) {
            return Err(FetchError::NotFound(format!("chapter {}", number)));
        }
        let key = keys::chapter(number, edition);
        let chapter = self
            .inner
            .query
            .fetch_query(&key, &QueryOptions::immutable(), self.chapter_fetcher(number, edition))
            .await?;
        self.prefetch_neighbors(number, edition);
        Ok(chapter)
    }

    /// Observe a chapter. Out-of-range numbers yield a disabled observer
    /// that never fetches.
    pub fn watch_chapter(&self, number: u16, edition: &str) -> QueryObserver<Chapter> {
        let options = QueryOptions::immutable().enabled(is_valid_chapter(number));
        self.inner.query.subscribe(
            keys::chapter(number, edition),
            options,
            self.chapter_fetcher(number, edition),
        )
    }

    fn prefetch_neighbors(&self, number: u16, edition: &str) {
        let neighbors = [number.checked_add(1), number.checked_sub(1)];
        for neighbor in neighbors.into_iter().flatten().filter(|n| is_valid_chapter(*n)) {
            self.inner.query.prefetch_query(
                &keys::chapter(neighbor, edition),
                &QueryOptions::immutable(),
                self.chapter_fetcher(neighbor, edition),
            );
        }
    }

    fn chapter_fetcher(
        &self,
        number: u16,
        edition: &str,
    ) -> impl Fn() -> BoxFetch<Chapter> + Send + Sync + 'static {
        let this = self.clone();
        let edition = edition.to_string();
        move || {
            let this = this.clone();
            let edition = edition.clone();
            async move {
                let key = keys::chapter(number, &edition).to_string();
                this.cache_aside(&key, Ttl::NEVER, || async {
                    let chapter = this.inner.source.fetch_chapter(number, &edition).await?;
                    if chapter.number != number {
                        return Err(FetchError::InvalidResponse(format!(
                            "Asked for chapter {}, got {}",
                            number, chapter.number
                        )));
                    }
                    Ok(chapter)
                })
                .await
            }
            .boxed()
        }
    }

    /// The chapter index. Also seeds each chapter's summary query.
    pub async fn chapter_list(&self) -> Result<Arc<Vec<ChapterSummary>>, FetchError> {
        let list = self
            .inner
            .query
            .fetch_query(&keys::chapter_list(), &QueryOptions::immutable(), self.chapter_list_fetcher())
            .await?;
        self.seed_summaries(&list);
        Ok(list)
    }

    pub async fn chapter_summary(&self, number: u16) -> Result<Arc<ChapterSummary>, FetchError> {
        let key = keys::chapter_summary(number);
        if let Some(summary) = self.inner.query.get_query_data(&key) {
            return Ok(summary);
        }
        self.chapter_list().await?;
        self.inner
            .query
            .get_query_data(&key)
            .ok_or_else(|| FetchError::NotFound(key.to_string()))
    }

    /// Chapters whose name contains `term`, case-insensitively. The term is
    /// recorded in the recent-search history.
    pub async fn search_chapters(&self, term: &str) -> Result<Vec<ChapterSummary>, FetchError> {
        if let Err(e) = self.inner.history.push(term) {
            warn!(error = %e, "Failed to record search term");
        }
        let needle = term.trim().to_lowercase();
        let list = self.chapter_list().await?;
        Ok(list
            .iter()
            .filter(|summary| summary.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    fn seed_summaries(&self, list: &[ChapterSummary]) {
        let options = QueryOptions::immutable();
        let mut seeded = 0;
        for summary in list {
            let key = keys::chapter_summary(summary.number);
            if self.inner.query.get_query_data::<ChapterSummary>(&key).is_none() {
                self.inner.query.set_query_data_with(&key, summary.clone(), &options);
                seeded += 1;
            }
        }
        if seeded > 0 {
            debug!(seeded, "Seeded chapter summaries");
        }
    }

    fn chapter_list_fetcher(&self) -> impl Fn() -> BoxFetch<Vec<ChapterSummary>> + Send + Sync + 'static {
        let this = self.clone();
        move || {
            let this = this.clone();
            async move {
                this.cache_aside(keys::CHAPTER_LIST, Ttl::NEVER, || this.inner.source.fetch_chapter_list())
                    .await
            }
            .boxed()
        }
    }

    // ===== Reviews =====

    fn reviews_options() -> QueryOptions {
        QueryOptions::default()
            .stale_time(REVIEWS_STALE_TIME)
            .gc_time(DEFAULT_GC_TIME)
            .stale_policy(StalePolicy::ServeStale)
    }

    pub async fn reviews(&self, chapter: u16) -> Result<Arc<Vec<Review>>, FetchError> {
        self.inner
            .query
            .fetch_query(&keys::reviews(chapter), &Self::reviews_options(), self.reviews_fetcher(chapter))
            .await
    }

    pub fn watch_reviews(&self, chapter: u16) -> QueryObserver<Vec<Review>> {
        let options = Self::reviews_options().enabled(is_valid_chapter(chapter));
        self.inner
            .query
            .subscribe(keys::reviews(chapter), options, self.reviews_fetcher(chapter))
    }

    /// Drop persisted reviews for `chapter` and mark the query stale, e.g.
    /// after the user posted a review.
    pub fn invalidate_reviews(&self, chapter: u16) -> Result<(), StoreError> {
        let key = keys::reviews(chapter);
        let record = key.to_string();
        self.bump_epoch(&record);
        self.inner.cache.delete(&record)?;
        self.inner.cache.delete(&keys::missing(&record))?;
        self.inner.query.invalidate_query(&key);
        info!(chapter, "Invalidated reviews");
        Ok(())
    }

    fn reviews_fetcher(&self, chapter: u16) -> impl Fn() -> BoxFetch<Vec<Review>> + Send + Sync + 'static {
        let this = self.clone();
        move || {
            let this = this.clone();
            async move {
                let key = keys::reviews(chapter).to_string();
                this.cache_aside(&key, REVIEWS_TTL, || this.inner.source.fetch_reviews(chapter))
                    .await
            }
            .boxed()
        }
    }

    // ===== Cache-aside core =====

    /// Serve `key` from the TTL cache, falling back to `fetch` when online.
    async fn cache_aside<T, F, Fut>(&self, key: &str, ttl: Ttl, fetch: F) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Validate,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let cache = &self.inner.cache;
        let epoch = self.epoch(key);
        if let Some(value) = cache.get::<T>(key) {
            debug!(key, "Cache hit");
            return Ok(value);
        }

        let missing = keys::missing(key);
        if cache.has(&missing) {
            debug!(key, "Known missing, skipping fetch");
            return Err(FetchError::NotFound(key.to_string()));
        }

        if !self.inner.connectivity.is_online() {
            debug!(key, "Offline with no cached copy");
            return Err(FetchError::OfflineNoCache {
                key: key.to_string(),
            });
        }

        debug!(key, "Cache miss, fetching");
        let started_at = cache.now();
        match fetch().await {
            Ok(value) if !value.is_complete() => {
                warn!(key, "Discarding incomplete payload");
                Err(FetchError::InvalidResponse(format!("Incomplete payload for {}", key)))
            }
            Ok(value) if self.epoch(key) != epoch => {
                debug!(key, "Invalidated during the fetch, not persisting");
                Ok(value)
            }
            Ok(value) => match cache.set_if_newer(key, &value, ttl, started_at) {
                Ok(true) => Ok(value),
                Ok(false) => Ok(cache.get(key).unwrap_or(value)),
                Err(e) => {
                    warn!(key, error = %e, "Failed to persist fetched value");
                    Ok(value)
                }
            },
            Err(FetchError::NotFound(detail)) => {
                if let Err(e) = cache.set(&missing, &true, NEGATIVE_TTL) {
                    warn!(key, error = %e, "Failed to record missing key");
                }
                Err(FetchError::NotFound(detail))
            }
            Err(e) => Err(e),
        }
    }

    fn epoch(&self, key: &str) -> u64 {
        let epochs = self.inner.epochs.lock().unwrap_or_else(PoisonError::into_inner);
        epochs.get(key).copied().unwrap_or(0)
    }

    fn bump_epoch(&self, key: &str) {
        let mut epochs = self.inner.epochs.lock().unwrap_or_else(PoisonError::into_inner);
        *epochs.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Remove in-memory and persisted state for one query key.
    pub fn forget(&self, key: &QueryKey) -> Result<(), StoreError> {
        let record = key.to_string();
        self.inner.query.remove_query(key);
        self.inner.cache.delete(&record)?;
        self.inner.cache.delete(&keys::missing(&record))
    }
}
