use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chapter::is_valid_chapter;
use super::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Review {
    pub id: String,
    pub chapter: u16,
    pub author: String,
    /// 1 to 5 stars.
    pub rating: u8,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "createdAt")]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

impl Validate for Review {
    fn is_complete(&self) -> bool {
        !self.id.trim().is_empty() && is_valid_chapter(self.chapter) && (1..=5).contains(&self.rating)
    }
}

/// A chapter with no reviews yet is a valid answer.
impl Validate for Vec<Review> {
    fn is_complete(&self) -> bool {
        self.iter().all(Validate::is_complete)
    }
}
