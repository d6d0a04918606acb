//! Domain payloads fetched from the content API and cached locally.
//!
//! - `Chapter`, `Verse`: immutable scripture text for one edition
//! - `ChapterSummary`: the chapter index
//! - `Review`: mutable, user-contributed reviews of a chapter
//!
//! With the `ts` feature the shapes are exported as TypeScript bindings for
//! the app front end.

pub mod chapter;
pub mod review;

pub use chapter::{Chapter, ChapterSummary, Verse, CHAPTER_COUNT};
pub use review::Review;

/// Structural completeness check applied to a payload before it is cached.
///
/// A fetch that succeeds with an incomplete payload is treated as a failed
/// fetch.
pub trait Validate {
    fn is_complete(&self) -> bool;
}
