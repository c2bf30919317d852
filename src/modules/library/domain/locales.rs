/// Locale codes kept in per-language dictionaries (titles, synopses)
///
/// Codes are ranked: when a single display text is needed the best-ranked
/// locale present wins. Anything outside this list is dropped on merge.
pub const RANKED_LOCALES: [&str; 30] = [
    "en", "ja-ro", "ja", "ko-ro", "ko", "zh-ro", "zh", "zh-hk", "es", "es-la", "pt-br", "pt",
    "fr", "de", "it", "ru", "pl", "tr", "id", "vi", "th", "uk", "ar", "nl", "cs", "hu", "ro",
    "sv", "fa", "he",
];

/// Provider spellings of the same locale
const ALIASES: [(&str, &str); 14] = [
    ("en-us", "en"),
    ("en-gb", "en"),
    ("en-jp", "ja-ro"),
    ("x-jat", "ja-ro"),
    ("romaji", "ja-ro"),
    ("ja-jp", "ja"),
    ("native", "ja"),
    ("en-kr", "ko-ro"),
    ("ko-kr", "ko"),
    ("en-cn", "zh-ro"),
    ("zh-cn", "zh"),
    ("zh-tw", "zh-hk"),
    ("pt-pt", "pt"),
    ("es-419", "es-la"),
];

/// Canonical code for a provider locale, or `None` if it is not kept
pub fn normalize_locale(code: &str) -> Option<&'static str> {
    let code = code.trim().to_lowercase().replace('_', "-");
    let code = ALIASES
        .iter()
        .find(|(alias, _)| *alias == code)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(code);

    RANKED_LOCALES.iter().copied().find(|known| *known == code)
}

/// Position in the ranking (lower is preferred)
pub fn locale_rank(code: &str) -> Option<usize> {
    let canonical = normalize_locale(code)?;
    RANKED_LOCALES.iter().position(|known| *known == canonical)
}

/// Chapter language key: canonical when known, lower-cased otherwise, `und` when missing
pub fn language_key(code: Option<&str>) -> String {
    match code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => normalize_locale(code)
            .map(str::to_string)
            .unwrap_or_else(|| code.to_lowercase().replace('_', "-")),
        None => "und".to_string(),
    }
}
