/// Fused library entities
///
/// A unified record is always derivable from its provenance: `metadata` holds
/// every contributing source record, the remaining fields are the output of
/// the reconciliation strategies over it. `external_ids` and `images` only
/// ever grow. `unavailable_images` remembers which agents' images failed to
/// download, per asset type, so later merges keep skipping them.
use super::locales::RANKED_LOCALES;
use crate::modules::agents::domain::{ChapterRecord, ImageKind, MangaRecord, SourceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedManga {
    pub id: Uuid,
    pub title: String,
    pub alt_titles: Vec<String>,
    /// Locale code -> title
    pub titles: BTreeMap<String, String>,
    /// Locale code -> synopsis
    pub synopsis: BTreeMap<String, String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub demographic: Option<String>,
    pub year: Option<i32>,
    pub score: Option<f64>,
    pub rank: Option<f64>,
    pub popularity: Option<f64>,
    pub chapter_count: Option<f64>,
    pub volume_count: Option<f64>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub artists: Vec<String>,
    /// Agent id -> manga id within that agent
    pub external_ids: BTreeMap<String, String>,
    /// Asset type -> agent id -> URL offered by that agent
    pub images: BTreeMap<ImageKind, BTreeMap<String, String>>,
    /// Asset type -> agents whose image failed to download
    #[serde(default)]
    pub unavailable_images: BTreeMap<ImageKind, BTreeSet<String>>,
    /// Display images picked from `images`
    pub cover: Option<String>,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    /// Provenance: one entry per contributing agent
    pub metadata: Vec<SourceRecord<MangaRecord>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UnifiedManga {
    /// Synopsis in the best-ranked locale available
    pub fn preferred_synopsis(&self) -> Option<&str> {
        preferred_text(&self.synopsis)
    }

    pub fn display_image(&self, kind: ImageKind) -> Option<&str> {
        match kind {
            ImageKind::Cover => self.cover.as_deref(),
            ImageKind::Poster => self.poster.as_deref(),
            ImageKind::Banner => self.banner.as_deref(),
        }
    }

    pub fn set_display_image(&mut self, kind: ImageKind, url: Option<String>) {
        match kind {
            ImageKind::Cover => self.cover = url,
            ImageKind::Poster => self.poster = url,
            ImageKind::Banner => self.banner = url,
        }
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.metadata.iter().map(|m| m.agent_id.as_str())
    }

    /// True when both records describe the same fused content (timestamps ignored)
    pub fn same_content(&self, other: &UnifiedManga) -> bool {
        let strip = |m: &UnifiedManga| UnifiedManga {
            created_at: DateTime::<Utc>::MIN_UTC,
            updated_at: DateTime::<Utc>::MIN_UTC,
            ..m.clone()
        };
        strip(self) == strip(other)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedChapter {
    pub id: Uuid,
    pub manga_id: Uuid,
    /// Grouping key: number (or normalized title) plus language
    pub key: String,
    pub number: Option<f64>,
    pub volume: Option<f64>,
    pub title: Option<String>,
    pub language: String,
    pub pages: Option<f64>,
    pub published_at: Option<String>,
    pub scanlators: Vec<String>,
    /// Agent id -> chapter id within that agent
    pub external_ids: BTreeMap<String, String>,
    /// Agent id -> reader URL
    pub urls: BTreeMap<String, String>,
    pub metadata: Vec<SourceRecord<ChapterRecord>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Text in the best-ranked locale of a per-language dictionary
pub fn preferred_text(map: &BTreeMap<String, String>) -> Option<&str> {
    RANKED_LOCALES
        .iter()
        .find_map(|locale| map.get(*locale))
        .or_else(|| map.values().next())
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_text_follows_rank() {
        let mut map = BTreeMap::new();
        map.insert("ja".to_string(), "ベルセルク".to_string());
        map.insert("ja-ro".to_string(), "Beruseruku".to_string());
        assert_eq!(preferred_text(&map), Some("Beruseruku"));

        map.insert("en".to_string(), "Berserk".to_string());
        assert_eq!(preferred_text(&map), Some("Berserk"));
        assert_eq!(preferred_text(&BTreeMap::new()), None);
    }
}
