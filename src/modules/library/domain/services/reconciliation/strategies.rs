/// Field-level merge strategies
///
/// Every strategy folds values left to right in source order, so "first seen"
/// means "from the earliest contributing source".
use crate::modules::library::domain::locales::normalize_locale;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

/// Most frequent value, ties going to the first seen. `None`s are ignored.
pub fn most_frequent<T, I>(values: I) -> Option<T>
where
    T: Clone + Eq + Hash,
    I: IntoIterator<Item = Option<T>>,
{
    most_frequent_by(values.into_iter().flatten(), |v| v.clone())
}

/// Most frequent value under a comparison key, ties going to the first seen.
/// The returned value is the first one seen for the winning key.
pub fn most_frequent_by<T, K, I, F>(values: I, key: F) -> Option<T>
where
    K: Eq + Hash,
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> K,
{
    let mut counts: HashMap<K, (usize, usize)> = HashMap::new();
    let mut firsts: Vec<T> = Vec::new();

    for value in values {
        let k = key(&value);
        match counts.get_mut(&k) {
            Some((count, _)) => *count += 1,
            None => {
                counts.insert(k, (1, firsts.len()));
                firsts.push(value);
            }
        }
    }

    let (_, winner) = counts
        .into_values()
        .max_by(|(ca, ia), (cb, ib)| ca.cmp(cb).then(ib.cmp(ia)))?;
    firsts.into_iter().nth(winner)
}

/// Most frequent non-blank text, compared case-insensitively
pub fn most_frequent_text<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    most_frequent_by(
        values
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
        |s| s.to_lowercase(),
    )
    .map(str::to_string)
}

/// Most frequent number; floats are compared by value
pub fn most_frequent_number<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    most_frequent_by(
        values.into_iter().flatten().filter(|v| v.is_finite()),
        |v| v.to_bits(),
    )
}

/// Highest value that is present and non-zero
pub fn highest_numeric<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite() && *v != 0.0)
        .fold(None, |best: Option<f64>, v| match best {
            Some(b) if b >= v => Some(b),
            _ => Some(v),
        })
}

/// Union of string lists in first-seen order; duplicates compared case-insensitively
pub fn union_distinct<'a, I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for item in lists.into_iter().flatten() {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            merged.push(trimmed.to_string());
        }
    }
    merged
}

/// Per-language dictionary merge: the first source supplying a locale wins,
/// locales outside the ranked list are dropped
pub fn localized_merge<'a, I>(maps: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    let mut merged = BTreeMap::new();
    for map in maps {
        for (code, text) in map {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if let Some(locale) = normalize_locale(code) {
                merged
                    .entry(locale.to_string())
                    .or_insert_with(|| text.to_string());
            }
        }
    }
    merged
}

/// Key-value union: existing keys are never overwritten
pub fn key_value_union<'a, I>(base: &BTreeMap<String, String>, additions: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut merged = base.clone();
    for (key, value) in additions {
        if value.trim().is_empty() {
            continue;
        }
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_frequent_prefers_majority_then_first_seen() {
        assert_eq!(most_frequent(vec![Some(1999), Some(2001), Some(2001)]), Some(2001));
        assert_eq!(most_frequent(vec![Some(1999), Some(2001)]), Some(1999));
        assert_eq!(most_frequent(vec![None, Some(2001)]), Some(2001));
        assert_eq!(most_frequent::<i32, _>(vec![None, None]), None);
    }

    #[test]
    fn test_most_frequent_text_is_case_insensitive() {
        let winner = most_frequent_text(vec![Some("ongoing"), Some("Completed"), Some("completed"), Some(" ")]);
        assert_eq!(winner.as_deref(), Some("Completed"));
    }

    #[test]
    fn test_highest_numeric_skips_empty() {
        assert_eq!(highest_numeric(vec![Some(80.0), None, Some(75.5)]), Some(80.0));
        assert_eq!(highest_numeric(vec![Some(0.0), None]), None);
        assert_eq!(highest_numeric(vec![Some(f64::NAN), Some(3.0)]), Some(3.0));
    }

    #[test]
    fn test_union_distinct_keeps_first_spelling() {
        let a = vec!["Action".to_string(), "Drama".to_string()];
        let b = vec!["action".to_string(), "Horror".to_string(), "".to_string()];
        assert_eq!(
            union_distinct([a.as_slice(), b.as_slice()]),
            vec!["Action", "Drama", "Horror"]
        );
    }

    #[test]
    fn test_localized_merge_first_source_wins() {
        let a: BTreeMap<String, String> = [("en".to_string(), "Berserk".to_string())].into();
        let b: BTreeMap<String, String> = [
            ("en".to_string(), "BERSERK".to_string()),
            ("ja_jp".to_string(), "ベルセルク".to_string()),
            ("tlh".to_string(), "???".to_string()),
        ]
        .into();

        let merged = localized_merge([&a, &b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["en"], "Berserk");
        assert_eq!(merged["ja"], "ベルセルク");
    }

    #[test]
    fn test_key_value_union_never_overwrites() {
        let base: BTreeMap<String, String> = [("mangadex".to_string(), "a".to_string())].into();
        let extra: BTreeMap<String, String> = [
            ("mangadex".to_string(), "b".to_string()),
            ("anilist".to_string(), "1".to_string()),
        ]
        .into();

        let merged = key_value_union(&base, &extra);
        assert_eq!(merged["mangadex"], "a");
        assert_eq!(merged["anilist"], "1");
    }
}
