pub mod locales;
pub mod repository;
pub mod services;
pub mod unified;

pub use repository::{LibraryRepository, LibraryStatistics, ReadingProgress};
pub use unified::{UnifiedChapter, UnifiedManga};
