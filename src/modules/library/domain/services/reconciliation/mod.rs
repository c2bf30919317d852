pub mod chapter_merger;
pub mod dedup;
pub mod image_priority;
pub mod manga_merger;
pub mod strategies;

pub use chapter_merger::{chapter_key, ChapterMerger};
pub use dedup::{cluster_search_results, match_score, MatchScore};
pub use image_priority::{ImageCandidate, ImagePriorities, ImageSelector};
pub use manga_merger::{FieldMerger, MangaMerger, MergeContext};
