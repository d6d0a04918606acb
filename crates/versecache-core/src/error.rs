//! Error types for the data-access layer.
//!
//! Storage-level problems (`StoreError`, `CodecError`) are recovered inside
//! the store and cache and never reach the UI. `FetchError` is the only
//! class surfaced to callers of the query layer.

use thiserror::Error;

/// Failures of the persistent store itself.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on store file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encrypt store contents")]
    Encryption,

    #[error("Failed to decrypt store - wrong key or tampered file")]
    Decryption,

    #[error("Store file is corrupt: {0}")]
    Corrupt(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to encode cache entry: {0}")]
    Codec(#[from] CodecError),
}

/// Reasons a stored record could not be turned back into a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Stored bytes do not parse: {0}")]
    Serialization(String),

    #[error("Stored value is a corruption sentinel")]
    Sentinel,

    #[error("Cache entry has an invalid shape: {0}")]
    Shape(&'static str),

    #[error("Value serializes to an absent value")]
    Absent,
}

/// Failure of a remote fetch, as seen by callers of the query layer.
///
/// `Clone` so one in-flight result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No cached data available offline for {key}")]
    OfflineNoCache { key: String },

    #[error("Cached value for {0} has a different type")]
    TypeMismatch(String),

    #[error("Fetch for {0} was aborted")]
    Aborted(String),
}

impl FetchError {
    /// Transient failures worth another attempt while online.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Server(_) | FetchError::RateLimited
        )
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, FetchError::OfflineNoCache { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Server("502".into()).is_retryable());
        assert!(FetchError::RateLimited.is_retryable());
        assert!(!FetchError::NotFound("surah 200".into()).is_retryable());
        assert!(!FetchError::InvalidResponse("empty".into()).is_retryable());
        assert!(!FetchError::OfflineNoCache { key: "k".into() }.is_retryable());
    }

    #[test]
    fn test_offline_message_names_key() {
        let err = FetchError::OfflineNoCache {
            key: "quran-surah-2-arabic".into(),
        };
        assert!(err.is_offline());
        assert_eq!(
            err.to_string(),
            "No cached data available offline for quran-surah-2-arabic"
        );
    }
}
