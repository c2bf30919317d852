pub mod reconciliation;

pub use reconciliation::{ChapterMerger, ImagePriorities, ImageSelector, MangaMerger};
