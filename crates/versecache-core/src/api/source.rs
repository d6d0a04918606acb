use std::future::Future;

use crate::error::FetchError;
use crate::models::{Chapter, ChapterSummary, Review};

/// Remote source of domain payloads.
///
/// Implementations report failures as `FetchError`; retries, caching and
/// validation happen above this trait.
pub trait ContentSource: Send + Sync + 'static {
    fn fetch_chapter(
        &self,
        number: u16,
        edition: &str,
    ) -> impl Future<Output = Result<Chapter, FetchError>> + Send;

    fn fetch_chapter_list(&self) -> impl Future<Output = Result<Vec<ChapterSummary>, FetchError>> + Send;

    fn fetch_reviews(&self, chapter: u16) -> impl Future<Output = Result<Vec<Review>, FetchError>> + Send;
}
