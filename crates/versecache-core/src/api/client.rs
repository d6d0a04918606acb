//! HTTP client for the content API.

use std::time::Duration;

use anyhow::Result;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::source::ContentSource;
use crate::error::FetchError;
use crate::models::{Chapter, ChapterSummary, Review};

/// Used when neither config nor environment names an API.
pub const DEFAULT_API_BASE_URL: &str = "https://api.versecache.app/v1";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Content API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), &body));
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| FetchError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
    }
}

impl ContentSource for ApiClient {
    async fn fetch_chapter(&self, number: u16, edition: &str) -> Result<Chapter, FetchError> {
        self.get(&format!("/surahs/{}", number), &[("edition", edition)])
            .await
    }

    async fn fetch_chapter_list(&self) -> Result<Vec<ChapterSummary>, FetchError> {
        self.get("/surahs", &[]).await
    }

    async fn fetch_reviews(&self, chapter: u16) -> Result<Vec<Review>, FetchError> {
        self.get(&format!("/surahs/{}/reviews", chapter), &[]).await
    }
}
