use serde::{Deserialize, Serialize};

use super::Validate;

/// Number of chapters (surahs).
pub const CHAPTER_COUNT: u16 = 114;

pub fn is_valid_chapter(number: u16) -> bool {
    (1..=CHAPTER_COUNT).contains(&number)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Verse {
    pub number: u16,
    pub text: String,
}

/// Full text of one chapter in one edition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Chapter {
    pub number: u16,
    pub name: String,
    pub edition: String,
    pub verses: Vec<Verse>,
    /// Payload version bumped by the producer on layout changes.
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ChapterSummary {
    pub number: u16,
    pub name: String,
    #[serde(rename = "verseCount")]
    pub verse_count: u16,
}

impl Validate for Verse {
    fn is_complete(&self) -> bool {
        self.number > 0 && !self.text.trim().is_empty()
    }
}

impl Validate for Chapter {
    fn is_complete(&self) -> bool {
        is_valid_chapter(self.number)
            && !self.name.trim().is_empty()
            && !self.verses.is_empty()
            && self.verses.iter().all(Validate::is_complete)
    }
}

impl Validate for ChapterSummary {
    fn is_complete(&self) -> bool {
        is_valid_chapter(self.number) && !self.name.trim().is_empty() && self.verse_count > 0
    }
}

/// The chapter index is only usable when it lists something.
impl Validate for Vec<ChapterSummary> {
    fn is_complete(&self) -> bool {
        !self.is_empty() && self.iter().all(Validate::is_complete)
    }
}
