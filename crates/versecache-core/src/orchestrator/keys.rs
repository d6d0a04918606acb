//! Cache key layout shared by the query cache and the persistent store.

use crate::query::QueryKey;

pub const CHAPTER_LIST: &str = "quran-chapters";
pub const RECENT_SEARCHES: &str = "recent-searches";

/// Suffix of the negative record written when the API reports not-found.
const MISSING_SUFFIX: &str = ":missing";

pub fn chapter(number: u16, edition: &str) -> QueryKey {
    QueryKey::new("quran-surah").with(number).with(edition)
}

pub fn chapter_list() -> QueryKey {
    QueryKey::new(CHAPTER_LIST)
}

pub fn chapter_summary(number: u16) -> QueryKey {
    QueryKey::new("quran-chapter-summary").with(number)
}

pub fn reviews(chapter: u16) -> QueryKey {
    QueryKey::new("reviews-surah").with(chapter)
}

pub fn missing(key: &str) -> String {
    format!("{}{}", key, MISSING_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(chapter(12, "arabic").to_string(), "quran-surah-12-arabic");
        assert_eq!(chapter_list().to_string(), "quran-chapters");
        assert_eq!(chapter_summary(2).to_string(), "quran-chapter-summary-2");
        assert_eq!(reviews(18).to_string(), "reviews-surah-18");
        assert_eq!(missing("reviews-surah-18"), "reviews-surah-18:missing");
    }
}
