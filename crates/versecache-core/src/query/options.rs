use std::time::Duration;

/// Retries after the first failed attempt.
pub const DEFAULT_RETRY: u32 = 2;

/// How long an unobserved entry stays in memory by default.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// What a query does when it has data that has gone stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Return the stale value now and refetch in the background. A failed
    /// refetch keeps the stale value.
    ServeStale,
    /// Wait for the refetch and surface its error.
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long a value stays fresh. `None` means it never goes stale.
    pub stale_time: Option<Duration>,
    /// How long an entry with no subscribers is kept. `None` means forever.
    pub gc_time: Option<Duration>,
    pub retry: u32,
    /// Subscriptions with `enabled == false` never start a fetch.
    pub enabled: bool,
    pub stale_policy: StalePolicy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Some(Duration::ZERO),
            gc_time: Some(DEFAULT_GC_TIME),
            retry: DEFAULT_RETRY,
            enabled: true,
            stale_policy: StalePolicy::ServeStale,
        }
    }
}

impl QueryOptions {
    /// For data that never changes once fetched.
    pub fn immutable() -> Self {
        Self {
            stale_time: None,
            gc_time: None,
            stale_policy: StalePolicy::FailFast,
            ..Self::default()
        }
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutable_never_expires() {
        let options = QueryOptions::immutable();
        assert_eq!(options.stale_time, None);
        assert_eq!(options.gc_time, None);
        assert_eq!(options.retry, DEFAULT_RETRY);
        assert_eq!(options.stale_policy, StalePolicy::FailFast);
    }

    #[test]
    fn test_builder_overrides() {
        let options = QueryOptions::default()
            .stale_time(Duration::from_secs(60))
            .gc_time(Duration::from_secs(300))
            .retry(0)
            .enabled(false);
        assert_eq!(options.stale_time, Some(Duration::from_secs(60)));
        assert_eq!(options.gc_time, Some(Duration::from_secs(300)));
        assert_eq!(options.retry, 0);
        assert!(!options.enabled);
    }
}
