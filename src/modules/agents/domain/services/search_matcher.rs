/// Fuzzy scoring of search hits against a query
///
/// Hits whose best title distance exceeds the threshold are dropped. When the
/// remaining set has no single high-confidence title match, the year and then
/// the author narrow it down.
use super::similarity::{HybridStrategy, SimilarityStrategy};
use super::title_normalizer::TitleNormalizer;
use crate::modules::agents::domain::entities::{MangaRecord, SearchQuery};

/// Distance (0..1, lower is closer) above which a hit is discarded
pub const MATCH_THRESHOLD: f64 = 0.3;
/// Distance at or below which a title match is considered certain
pub const HIGH_CONFIDENCE: f64 = 0.05;
pub const YEAR_TOLERANCE: i32 = 2;
const AUTHOR_SIMILARITY: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub record: MangaRecord,
    pub distance: f64,
}

pub struct SearchMatcher {
    strategy: Box<dyn SimilarityStrategy>,
    normalizer: TitleNormalizer,
    threshold: f64,
}

impl Default for SearchMatcher {
    fn default() -> Self {
        Self {
            strategy: Box::new(HybridStrategy::default_hybrid()),
            normalizer: TitleNormalizer::search_pipeline(),
            threshold: MATCH_THRESHOLD,
        }
    }
}

impl SearchMatcher {
    pub fn new(strategy: Box<dyn SimilarityStrategy>, threshold: f64) -> Self {
        Self {
            strategy,
            normalizer: TitleNormalizer::search_pipeline(),
            threshold,
        }
    }

    /// Best distance between any query title and any title of the record
    pub fn title_distance(&self, query: &SearchQuery, record: &MangaRecord) -> f64 {
        let wanted: Vec<String> = query
            .all_titles()
            .map(|t| self.normalizer.normalize(t))
            .collect();
        record
            .all_titles()
            .into_iter()
            .map(|title| {
                let title = self.normalizer.normalize(title);
                wanted
                    .iter()
                    .map(|w| self.strategy.distance(w, &title))
                    .fold(1.0, f64::min)
            })
            .fold(1.0, f64::min)
    }

    /// Score, filter and order hits, closest first
    pub fn rank(&self, query: &SearchQuery, records: Vec<MangaRecord>) -> Vec<ScoredMatch> {
        let mut matches: Vec<ScoredMatch> = records
            .into_iter()
            .map(|record| ScoredMatch {
                distance: self.title_distance(query, &record),
                record,
            })
            .filter(|m| m.distance <= self.threshold)
            .collect();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let certain = matches
            .iter()
            .filter(|m| m.distance <= HIGH_CONFIDENCE)
            .count();
        if matches.len() <= 1 || certain == 1 {
            return matches;
        }

        if let Some(year) = query.year {
            matches = narrow(matches, |m| {
                m.record
                    .year
                    .map(|y| (y - year).abs() <= YEAR_TOLERANCE)
                    .unwrap_or(false)
            });
        }

        if let Some(author) = query.author.as_deref() {
            let wanted = self.normalizer.normalize(author);
            matches = narrow(matches, |m| {
                m.record.authors.iter().any(|a| {
                    self.strategy
                        .calculate(&wanted, &self.normalizer.normalize(a))
                        >= AUTHOR_SIMILARITY
                })
            });
        }

        matches
    }
}

/// Keep only the matches satisfying `keep`, unless that would leave none
fn narrow<F>(matches: Vec<ScoredMatch>, keep: F) -> Vec<ScoredMatch>
where
    F: Fn(&ScoredMatch) -> bool,
{
    if matches.iter().any(&keep) {
        matches.into_iter().filter(|m| keep(m)).collect()
    } else {
        matches
    }
}
