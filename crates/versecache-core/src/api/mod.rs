//! Remote content API.
//!
//! `ContentSource` is the seam the orchestrator fetches through; `ApiClient`
//! implements it over HTTP. Status codes map onto `FetchError` so the query
//! layer can decide what is worth retrying.

pub mod client;
pub mod error;
pub mod source;

pub use client::{ApiClient, DEFAULT_API_BASE_URL};
pub use source::ContentSource;
