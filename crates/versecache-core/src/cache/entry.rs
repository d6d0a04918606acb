use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time-to-live in milliseconds. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ttl(i64);

impl Ttl {
    /// Expires on the next read.
    pub const ZERO: Ttl = Ttl(0);
    /// For immutable reference data.
    pub const NEVER: Ttl = Ttl(i64::MAX);

    /// Negative values clamp to zero.
    pub const fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Ttl(0)
        } else {
            Ttl(millis)
        }
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self::from_millis(secs.saturating_mul(1000))
    }

    pub const fn from_mins(mins: i64) -> Self {
        Self::from_secs(mins.saturating_mul(60))
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Ttl(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
    }
}

/// One cached value with the time it was written and how long it lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Epoch milliseconds at write time.
    pub timestamp: i64,
    /// Lifetime in milliseconds.
    pub ttl: i64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, timestamp: i64, ttl: Ttl) -> Self {
        Self {
            data,
            timestamp,
            ttl: ttl.as_millis(),
        }
    }

    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.timestamp)
    }

    /// A zero ttl is expired even when read in the same millisecond.
    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl <= 0 || self.age_millis(now) > self.ttl
    }

    /// Short human-readable age, e.g. "42s ago" or "3h ago".
    pub fn age_display(&self, now: i64) -> String {
        let secs = self.age_millis(now).max(0) / 1000;
        match secs {
            0..=4 => "just now".to_string(),
            5..=59 => format!("{}s ago", secs),
            60..=3599 => format!("{}m ago", secs / 60),
            3600..=86_399 => format!("{}h ago", secs / 3600),
            _ => format!("{}d ago", secs / 86_400),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_ttl_clamps_to_zero() {
        assert_eq!(Ttl::from_millis(-500), Ttl::ZERO);
        assert_eq!(Ttl::from_secs(-1), Ttl::ZERO);
        assert_eq!(Ttl::from_mins(5).as_millis(), 300_000);
        assert_eq!(Ttl::from(Duration::from_secs(2)).as_millis(), 2_000);
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new("v", 1_000, Ttl::from_millis(100));
        assert!(!entry.is_expired(1_000));
        assert!(!entry.is_expired(1_100));
        assert!(entry.is_expired(1_101));
    }

    #[test]
    fn test_zero_ttl_is_already_expired() {
        let entry = CacheEntry::new(1, 1_000, Ttl::ZERO);
        assert!(entry.is_expired(1_000));
        assert!(entry.is_expired(1_001));
    }

    #[test]
    fn test_never_does_not_expire() {
        let entry = CacheEntry::new(1, 0, Ttl::NEVER);
        assert!(!entry.is_expired(i64::MAX));
    }

    #[test]
    fn test_clock_skew_is_not_expired() {
        let entry = CacheEntry::new(1, 10_000, Ttl::from_millis(1));
        assert!(!entry.is_expired(5_000));
        assert_eq!(entry.age_display(5_000), "just now");
    }

    #[test]
    fn test_age_display() {
        let entry = CacheEntry::new((), 0, Ttl::NEVER);
        assert_eq!(entry.age_display(30_000), "30s ago");
        assert_eq!(entry.age_display(150_000), "2m ago");
        assert_eq!(entry.age_display(7_200_000), "2h ago");
        assert_eq!(entry.age_display(3 * 86_400_000), "3d ago");
    }
}
