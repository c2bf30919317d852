/// Fused library: unified records, reconciliation and the library store contract
pub mod domain;
pub mod infrastructure;

pub use domain::{
    LibraryRepository, LibraryStatistics, ReadingProgress, UnifiedChapter, UnifiedManga,
};
pub use domain::services::{ChapterMerger, MangaMerger};
pub use infrastructure::InMemoryLibraryRepository;
