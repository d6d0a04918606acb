use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::watch;

use super::client::{QueryClient, Snapshot};
use super::key::QueryKey;
use crate::error::FetchError;

/// Point-in-time view of a query as seen by a subscriber.
#[derive(Debug)]
pub struct QueryState<T> {
    pub data: Option<Arc<T>>,
    /// No data yet and a fetch is running.
    pub is_loading: bool,
    pub is_fetching: bool,
    pub error: Option<FetchError>,
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            error: self.error.clone(),
        }
    }
}

/// Live subscription to one query. Dropping it unsubscribes; a fetch that
/// is already running still completes and is cached.
pub struct QueryObserver<T> {
    client: QueryClient,
    key: QueryKey,
    generation: u64,
    receiver: watch::Receiver<Snapshot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    pub(crate) fn new(
        client: QueryClient,
        key: QueryKey,
        generation: u64,
        receiver: watch::Receiver<Snapshot>,
    ) -> Self {
        Self {
            client,
            key,
            generation,
            receiver,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState<T> {
        convert(&self.key, &self.receiver.borrow())
    }

    /// Wait for the next published change.
    ///
    /// Returns `None` if the entry was removed from the cache.
    pub async fn changed(&mut self) -> Option<QueryState<T>> {
        self.receiver.changed().await.ok()?;
        Some(convert(&self.key, &self.receiver.borrow_and_update()))
    }

    /// Wait until no fetch is running and return the resulting state.
    pub async fn wait_settled(&mut self) -> QueryState<T> {
        loop {
            let state = convert(&self.key, &self.receiver.borrow_and_update());
            if !state.is_fetching {
                return state;
            }
            if self.receiver.changed().await.is_err() {
                return self.state();
            }
        }
    }

    pub fn refetch(&self) -> bool {
        self.client.refetch(&self.key)
    }
}

fn convert<T: Send + Sync + 'static>(key: &QueryKey, snapshot: &Snapshot) -> QueryState<T> {
    let (data, error) = match snapshot.data.clone().map(|data| data.downcast::<T>()) {
        Some(Ok(data)) => (Some(data), snapshot.error.clone()),
        Some(Err(_)) => (None, Some(FetchError::TypeMismatch(key.to_string()))),
        None => (None, snapshot.error.clone()),
    };
    QueryState {
        is_loading: data.is_none() && snapshot.is_fetching,
        is_fetching: snapshot.is_fetching,
        data,
        error,
    }
}

impl<T> Drop for QueryObserver<T> {
    fn drop(&mut self) {
        self.client.unsubscribe(&self.key, self.generation);
    }
}
