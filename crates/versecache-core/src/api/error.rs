use crate::error::FetchError;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data.
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl FetchError {
    /// Map a non-success HTTP status to the fetch error it represents.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = truncate_body(body);
        match status {
            404 => FetchError::NotFound(truncated),
            429 => FetchError::RateLimited,
            500..=599 => FetchError::Server(format!("Status {}: {}", status, truncated)),
            _ => FetchError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::InvalidResponse(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(FetchError::from_status(404, "no such surah"), FetchError::NotFound("no such surah".into()));
        assert_eq!(FetchError::from_status(429, ""), FetchError::RateLimited);
        assert!(matches!(FetchError::from_status(503, "busy"), FetchError::Server(_)));
        assert!(matches!(FetchError::from_status(400, "bad"), FetchError::InvalidResponse(_)));
    }

    #[test]
    fn test_server_errors_are_retryable_not_found_is_not() {
        assert!(FetchError::from_status(502, "").is_retryable());
        assert!(!FetchError::from_status(404, "").is_retryable());
    }

    #[test]
    fn test_long_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        let truncated = truncate_body(&body);
        assert!(truncated.contains("truncated, 800 total bytes"));
        assert!(truncated.len() < body.len());
    }
}
