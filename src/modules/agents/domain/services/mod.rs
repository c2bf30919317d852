pub mod search_matcher;
pub mod similarity;
pub mod title_normalizer;

pub use search_matcher::{ScoredMatch, SearchMatcher, MATCH_THRESHOLD};
pub use similarity::{HybridStrategy, SimilarityStrategy};
pub use title_normalizer::{normalized_key, TitleNormalizer};
