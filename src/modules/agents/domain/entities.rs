/// Normalized per-source records
///
/// Every agent's raw payload is mapped through its schema into these shapes.
/// All fields are optional or defaulted: one source rarely knows everything.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity types an agent can describe with a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Search hit (usually a trimmed-down manga)
    Lookup,
    Manga,
    Chapter,
    Character,
    Page,
    Recommendation,
    /// Shape of a push payload for reading progress
    Scrobbler,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Lookup => "lookup",
            EntityKind::Manga => "manga",
            EntityKind::Chapter => "chapter",
            EntityKind::Character => "character",
            EntityKind::Page => "page",
            EntityKind::Recommendation => "recommendation",
            EntityKind::Scrobbler => "scrobbler",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterRecord {
    pub name: String,
    pub role: Option<String>,
    pub image: Option<String>,
}

/// One source's view of a manga
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MangaRecord {
    /// Id of the manga within the source
    pub source_id: String,
    pub title: Option<String>,
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
    pub cover: Option<String>,
    pub poster: Option<String>,
    pub banner: Option<String>,
    /// Cross references the source knows about (agent id -> id)
    pub external_ids: BTreeMap<String, String>,
    pub characters: Vec<CharacterRecord>,
}

impl MangaRecord {
    /// Every title this record is known by
    pub fn all_titles(&self) -> Vec<&str> {
        let mut titles: Vec<&str> = Vec::new();
        if let Some(title) = &self.title {
            titles.push(title);
        }
        titles.extend(self.titles.values().map(String::as_str));
        titles.extend(self.alt_titles.iter().map(String::as_str));
        titles
    }

    /// URL this record offers for an asset type, if any
    pub fn image(&self, kind: ImageKind) -> Option<&str> {
        match kind {
            ImageKind::Cover => self.cover.as_deref(),
            ImageKind::Poster => self.poster.as_deref(),
            ImageKind::Banner => self.banner.as_deref(),
        }
        .filter(|url| !url.trim().is_empty())
    }
}

/// Display image asset types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Cover,
    Poster,
    Banner,
}

impl ImageKind {
    pub const ALL: [ImageKind; 3] = [ImageKind::Cover, ImageKind::Poster, ImageKind::Banner];
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImageKind::Cover => "cover",
            ImageKind::Poster => "poster",
            ImageKind::Banner => "banner",
        };
        write!(f, "{}", name)
    }
}

/// One source's view of a chapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterRecord {
    pub source_id: String,
    pub number: Option<f64>,
    pub volume: Option<f64>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub pages: Option<f64>,
    pub published_at: Option<String>,
    pub scanlator: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageRecord {
    pub index: u32,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommendationRecord {
    pub source_id: String,
    pub title: Option<String>,
    pub score: Option<f64>,
    pub cover: Option<String>,
}

/// Reading progress pushed to tracking agents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrobbleUpdate {
    /// Agent id -> manga id within that agent
    pub ids: BTreeMap<String, String>,
    pub chapter: f64,
    pub volume: Option<f64>,
    pub status: Option<String>,
    pub score: Option<f64>,
}

/// Search input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    pub title: String,
    /// Other known titles; a hit matching any of them counts
    pub alt_titles: Vec<String>,
    pub year: Option<i32>,
    pub author: Option<String>,
    pub language: Option<String>,
}

impl SearchQuery {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_alt_titles<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alt_titles.extend(titles.into_iter().map(Into::into));
        self
    }

    /// Primary title followed by the non-blank alternates
    pub fn all_titles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str())
            .chain(self.alt_titles.iter().map(String::as_str))
            .filter(|t| !t.trim().is_empty())
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// A record tagged with the agent it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord<T> {
    pub agent_id: String,
    pub fetched_at: DateTime<Utc>,
    pub record: T,
}

impl<T> SourceRecord<T> {
    pub fn new(agent_id: impl Into<String>, record: T) -> Self {
        Self {
            agent_id: agent_id.into(),
            fetched_at: Utc::now(),
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manga_record_defaults_missing_fields() {
        let record: MangaRecord = serde_json::from_value(json!({
            "sourceId": "42",
            "title": "Foo",
            "type": "manga"
        }))
        .unwrap();

        assert_eq!(record.title.as_deref(), Some("Foo"));
        assert_eq!(record.kind.as_deref(), Some("manga"));
        assert!(record.genres.is_empty());
        assert!(record.score.is_none());
    }

    #[test]
    fn test_all_titles() {
        let mut record = MangaRecord {
            title: Some("Foo".into()),
            alt_titles: vec!["Fu".into()],
            ..MangaRecord::default()
        };
        record.titles.insert("ja".into(), "フー".into());
        assert_eq!(record.all_titles(), vec!["Foo", "フー", "Fu"]);
    }
}
