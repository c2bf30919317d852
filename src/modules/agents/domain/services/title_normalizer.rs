use std::collections::HashSet;

/// Transformation that can be applied to a title
pub trait TitleTransformation: Send + Sync {
    fn transform(&self, title: &str) -> String;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct LowercaseTransform;

impl TitleTransformation for LowercaseTransform {
    fn transform(&self, title: &str) -> String {
        title.to_lowercase()
    }

    fn name(&self) -> &'static str {
        "Lowercase"
    }
}

/// Removes bracketed format markers such as "(manga)" or "[official]"
#[derive(Debug, Clone)]
pub struct RemoveBracketedTransform;

impl TitleTransformation for RemoveBracketedTransform {
    fn transform(&self, title: &str) -> String {
        let mut out = String::with_capacity(title.len());
        let mut depth = 0usize;
        for c in title.chars() {
            match c {
                '(' | '[' => depth += 1,
                ')' | ']' if depth > 0 => {
                    depth -= 1;
                    out.push(' ');
                }
                _ if depth == 0 => out.push(c),
                _ => {}
            }
        }
        out
    }

    fn name(&self) -> &'static str {
        "RemoveBracketed"
    }
}

/// Removes special characters, keeping only alphanumeric and whitespace
///
/// Separators such as ':' and '-' become spaces so "Re:Zero" and "Re Zero"
/// normalize alike.
#[derive(Debug, Clone)]
pub struct RemoveSpecialCharsTransform;

impl TitleTransformation for RemoveSpecialCharsTransform {
    fn transform(&self, title: &str) -> String {
        title
            .chars()
            .filter_map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    Some(c)
                } else if matches!(c, ':' | '-' | '_' | '/' | '.' | '~') {
                    Some(' ')
                } else {
                    None
                }
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "RemoveSpecialChars"
    }
}

/// Collapses runs of whitespace and trims
#[derive(Debug, Clone)]
pub struct NormalizeWhitespaceTransform;

impl TitleTransformation for NormalizeWhitespaceTransform {
    fn transform(&self, title: &str) -> String {
        title.split_whitespace().collect::<Vec<&str>>().join(" ")
    }

    fn name(&self) -> &'static str {
        "NormalizeWhitespace"
    }
}

/// Removes stop words (only when something else remains)
#[derive(Debug, Clone)]
pub struct RemoveStopWordsTransform {
    stop_words: HashSet<String>,
}

impl RemoveStopWordsTransform {
    pub fn new(stop_words: Vec<String>) -> Self {
        Self {
            stop_words: stop_words.into_iter().collect(),
        }
    }
}

impl TitleTransformation for RemoveStopWordsTransform {
    fn transform(&self, title: &str) -> String {
        let kept: Vec<&str> = title
            .split_whitespace()
            .filter(|word| !self.stop_words.contains(&word.to_lowercase()))
            .collect();
        if kept.is_empty() {
            title.to_string()
        } else {
            kept.join(" ")
        }
    }

    fn name(&self) -> &'static str {
        "RemoveStopWords"
    }
}

/// Title normalizer that applies a pipeline of transformations
pub struct TitleNormalizer {
    transformations: Vec<Box<dyn TitleTransformation>>,
}

impl TitleNormalizer {
    pub fn new() -> Self {
        Self {
            transformations: Vec::new(),
        }
    }

    /// Pipeline used for identity keys: lowercase, no brackets, no punctuation
    pub fn key_pipeline() -> Self {
        Self::new()
            .with_lowercase()
            .with_remove_bracketed()
            .with_remove_special_chars()
            .with_normalize_whitespace()
    }

    /// Pipeline used for fuzzy search scoring
    pub fn search_pipeline() -> Self {
        Self::key_pipeline().with_remove_stop_words(vec![
            "the".to_string(),
            "a".to_string(),
            "an".to_string(),
            "no".to_string(),
        ])
    }

    pub fn with_lowercase(mut self) -> Self {
        self.transformations.push(Box::new(LowercaseTransform));
        self
    }

    pub fn with_remove_bracketed(mut self) -> Self {
        self.transformations.push(Box::new(RemoveBracketedTransform));
        self
    }

    pub fn with_remove_special_chars(mut self) -> Self {
        self.transformations
            .push(Box::new(RemoveSpecialCharsTransform));
        self
    }

    pub fn with_normalize_whitespace(mut self) -> Self {
        self.transformations
            .push(Box::new(NormalizeWhitespaceTransform));
        self
    }

    pub fn with_remove_stop_words(mut self, stop_words: Vec<String>) -> Self {
        self.transformations
            .push(Box::new(RemoveStopWordsTransform::new(stop_words)));
        self
    }

    /// Apply all transformations to the title
    pub fn normalize(&self, title: &str) -> String {
        let mut result = title.to_string();

        for transformation in &self.transformations {
            result = transformation.transform(&result);
            log::trace!("After {}: '{}'", transformation.name(), result);
        }

        result
    }

    pub fn transformation_count(&self) -> usize {
        self.transformations.len()
    }
}

impl Default for TitleNormalizer {
    fn default() -> Self {
        Self::key_pipeline()
    }
}

/// Identity key for a title: lower-cased, special characters stripped
pub fn normalized_key(title: &str) -> String {
    TitleNormalizer::key_pipeline().normalize(title)
}
