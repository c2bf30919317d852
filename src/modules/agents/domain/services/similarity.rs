use crate::shared::errors::{AppError, AppResult};
use strsim::{jaro_winkler, normalized_levenshtein};

/// Strategy for calculating similarity between two strings
pub trait SimilarityStrategy: Send + Sync {
    /// Returns a value between 0.0 (completely different) and 1.0 (identical)
    fn calculate(&self, query: &str, target: &str) -> f64;

    fn name(&self) -> &'static str;

    /// Distance on 0..1, lower is closer
    fn distance(&self, query: &str, target: &str) -> f64 {
        1.0 - self.calculate(query, target)
    }
}

/// Jaro-Winkler: favours shared prefixes, good for short titles
#[derive(Debug, Clone)]
pub struct JaroWinklerStrategy;

impl SimilarityStrategy for JaroWinklerStrategy {
    fn calculate(&self, query: &str, target: &str) -> f64 {
        jaro_winkler(query, target)
    }

    fn name(&self) -> &'static str {
        "JaroWinkler"
    }
}

/// Normalized Levenshtein: catches typos and character-level differences
#[derive(Debug, Clone)]
pub struct LevenshteinStrategy;

impl SimilarityStrategy for LevenshteinStrategy {
    fn calculate(&self, query: &str, target: &str) -> f64 {
        normalized_levenshtein(query, target)
    }

    fn name(&self) -> &'static str {
        "Levenshtein"
    }
}

/// Weighted average of several strategies
pub struct HybridStrategy {
    strategies: Vec<(Box<dyn SimilarityStrategy>, f64)>,
}

impl HybridStrategy {
    /// Weights must sum to 1.0
    pub fn new(strategies: Vec<(Box<dyn SimilarityStrategy>, f64)>) -> AppResult<Self> {
        let weight_sum: f64 = strategies.iter().map(|(_, w)| w).sum();
        if (weight_sum - 1.0).abs() >= 0.01 {
            return Err(AppError::ConfigError(format!(
                "Strategy weights must sum to 1.0, got {}",
                weight_sum
            )));
        }
        Ok(Self { strategies })
    }

    /// Jaro-Winkler (70%) + Levenshtein (30%)
    pub fn default_hybrid() -> Self {
        Self {
            strategies: vec![
                (Box::new(JaroWinklerStrategy), 0.7),
                (Box::new(LevenshteinStrategy), 0.3),
            ],
        }
    }
}

impl Default for HybridStrategy {
    fn default() -> Self {
        Self::default_hybrid()
    }
}

impl SimilarityStrategy for HybridStrategy {
    fn calculate(&self, query: &str, target: &str) -> f64 {
        self.strategies
            .iter()
            .map(|(strategy, weight)| strategy.calculate(query, target) * weight)
            .sum()
    }

    fn name(&self) -> &'static str {
        "Hybrid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings() {
        assert_eq!(JaroWinklerStrategy.calculate("berserk", "berserk"), 1.0);
        assert_eq!(LevenshteinStrategy.calculate("berserk", "berserk"), 1.0);
        assert!(HybridStrategy::default().distance("berserk", "berserk") < 1e-9);
    }

    #[test]
    fn test_unrelated_strings_are_far() {
        let hybrid = HybridStrategy::default_hybrid();
        assert!(hybrid.distance("berserk", "one piece") > 0.3);
    }

    #[test]
    fn test_typo_is_close() {
        let hybrid = HybridStrategy::default_hybrid();
        assert!(hybrid.distance("vinland saga", "vinland sagа") < 0.3);
        assert!(hybrid.distance("chainsaw man", "chainsawman") < 0.3);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let result = HybridStrategy::new(vec![(Box::new(JaroWinklerStrategy), 0.5)]);
        assert!(matches!(result, Err(AppError::ConfigError(_))));

        let ok = HybridStrategy::new(vec![
            (Box::new(JaroWinklerStrategy), 0.5),
            (Box::new(LevenshteinStrategy), 0.5),
        ]);
        assert!(ok.is_ok());
    }
}
