//! Shipped provider adapters

pub mod anilist;
pub mod kitsu;
pub mod mangadex;
pub mod mangaupdates;

pub use anilist::AniListAgent;
pub use kitsu::KitsuAgent;
pub use mangadex::MangaDexAgent;
pub use mangaupdates::MangaUpdatesAgent;

use serde_json::{Map, Value};

/// `{"en": text}` from a plain string
pub(crate) fn english_text(value: &Value) -> Option<Value> {
    let text = value.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    let mut map = Map::new();
    map.insert("en".to_string(), Value::String(text.to_string()));
    Some(Value::Object(map))
}

/// Lower-cased string
pub(crate) fn lowercase(value: &Value) -> Option<Value> {
    value
        .as_str()
        .map(|s| Value::String(s.trim().to_lowercase().replace(' ', "_")))
}

/// A 0..10 score scaled to 0..100
pub(crate) fn score_out_of_ten(value: &Value) -> Option<Value> {
    let score = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(Value::from(score * 10.0))
}

/// Offset-based "more results" check for APIs that report a total
pub(crate) fn has_more_by_total(body: &Value, offset: u32, returned: usize) -> bool {
    body.get("total")
        .and_then(Value::as_u64)
        .map(|total| (offset as u64 + returned as u64) < total)
        .unwrap_or(false)
}

/// Take the array at `key`, or an empty list
pub(crate) fn array_at(body: &Value, key: &str) -> Vec<Value> {
    body.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_helpers() {
        assert_eq!(english_text(&json!(" Hello ")), Some(json!({"en": "Hello"})));
        assert_eq!(english_text(&json!("")), None);
        assert_eq!(lowercase(&json!("Light Novel")), Some(json!("light_novel")));
        assert_eq!(score_out_of_ten(&json!("7.5")), Some(json!(75.0)));
        assert!(has_more_by_total(&json!({"total": 30}), 10, 10));
        assert!(!has_more_by_total(&json!({"total": 20}), 10, 10));
        assert!(array_at(&json!({"x": 1}), "data").is_empty());
    }
}
