//! Kitsu adapter (JSON:API)
//!
//! Kitsu links are usually slugs (`kitsu.io/manga/<slug>`); the numeric id is
//! looked up with a slug filter before any id-based call.

use super::{array_at, english_text, lowercase};
use crate::modules::agents::domain::{
    Capabilities, Capability, EntityKind, EntitySchema, FieldSource, ImageKind, Transform,
};
use crate::modules::agents::infrastructure::http_client::{AgentHttpClient, RetryPolicy};
use crate::modules::agents::traits::{Agent, Pagination, RateLimitConfig, RawPage, RawRequest};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub const AGENT_ID: &str = "kitsu";
const SEARCH_LIMIT: u32 = 20;
/// Kitsu caps `page[limit]` at 20
const CHAPTER_PAGE_SIZE: u32 = 20;
const CHAPTER_MAX_PAGES: u32 = 100;

pub struct KitsuAgent {
    client: AgentHttpClient,
    host: String,
    cache_ttl: Duration,
}

impl KitsuAgent {
    pub fn new(host: &str, cache_ttl: Duration) -> AppResult<Self> {
        Ok(Self {
            client: AgentHttpClient::new("Kitsu", RetryPolicy::default())?,
            host: host.trim_end_matches('/').to_string(),
            cache_ttl,
        })
    }

    fn require_id(request: &RawRequest) -> AppResult<&str> {
        request
            .id
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("Kitsu request without id".to_string()))
    }

    fn params(pairs: &[(&str, String)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    async fn manga(&self, id: &str) -> AppResult<RawPage> {
        let body = self
            .client
            .get_json(
                &format!("{}/manga/{}", self.host, urlencoding::encode(id)),
                &Self::params(&[("include", "genres".to_string())]),
            )
            .await?;

        let mut data = body
            .get("data")
            .cloned()
            .filter(Value::is_object)
            .ok_or_else(|| AppError::NotFound(format!("Kitsu manga {}", id)))?;

        let genres: Vec<Value> = array_at(&body, "included")
            .into_iter()
            .filter(|i| i.get("type").and_then(Value::as_str) == Some("genres"))
            .filter_map(|i| i.pointer("/attributes/name").cloned())
            .collect();
        if let Value::Object(map) = &mut data {
            map.insert("genres".into(), Value::Array(genres));
        }
        Ok(RawPage::single(data))
    }

    async fn chapters(&self, request: &RawRequest) -> AppResult<RawPage> {
        let id = Self::require_id(request)?;
        let limit = if request.limit == 0 { CHAPTER_PAGE_SIZE } else { request.limit };
        let body = self
            .client
            .get_json(
                &format!("{}/manga/{}/chapters", self.host, urlencoding::encode(id)),
                &Self::params(&[
                    ("page[limit]", limit.to_string()),
                    ("page[offset]", request.offset.to_string()),
                    ("sort", "number".to_string()),
                ]),
            )
            .await?;

        let has_more = body.pointer("/links/next").map_or(false, Value::is_string);
        Ok(RawPage::of(array_at(&body, "data"), has_more))
    }

    fn manga_schema() -> EntitySchema {
        EntitySchema::new()
            .field("sourceId", FieldSource::path("id"))
            .field("title", FieldSource::transform("attributes.canonicalTitle", Transform::Text))
            .field("titles", FieldSource::transform("attributes.titles", Transform::LocalizedMap))
            .field("altTitles", FieldSource::transform("attributes.abbreviatedTitles", Transform::StringList))
            .field("synopsis", FieldSource::transform("attributes.synopsis", Transform::Custom(english_text)))
            .field("status", FieldSource::transform("attributes.status", Transform::Lowercase))
            .field("type", FieldSource::transform("attributes.subtype", Transform::Custom(lowercase)))
            .field("year", FieldSource::transform("attributes.startDate", Transform::Year))
            .field("score", FieldSource::transform("attributes.averageRating", Transform::Number))
            .field("rank", FieldSource::transform("attributes.ratingRank", Transform::Number))
            .field("popularity", FieldSource::transform("attributes.userCount", Transform::Number))
            .field("chapterCount", FieldSource::transform("attributes.chapterCount", Transform::Number))
            .field("volumeCount", FieldSource::transform("attributes.volumeCount", Transform::Number))
            .field("genres", FieldSource::transform("genres", Transform::StringList))
            .field("cover", FieldSource::path("attributes.posterImage.original"))
            .field("poster", FieldSource::path("attributes.posterImage.original"))
            .field("banner", FieldSource::path("attributes.coverImage.original"))
    }
}

#[async_trait]
impl Agent for KitsuAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn capabilities(&self) -> Capabilities {
        Capability::Metadata | Capability::Search | Capability::Chapters
    }

    fn priority(&self) -> u32 {
        40
    }

    fn image_priority(&self, kind: ImageKind) -> u32 {
        match kind {
            ImageKind::Poster => 10,
            ImageKind::Banner => 20,
            ImageKind::Cover => 30,
        }
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::per_second(2.0, 2)
    }

    fn cache_ttl(&self) -> Option<Duration> {
        Some(self.cache_ttl)
    }

    fn pagination(&self, capability: Capability) -> Pagination {
        match capability {
            Capability::Chapters => Pagination::Paged {
                page_size: CHAPTER_PAGE_SIZE,
                max_pages: CHAPTER_MAX_PAGES,
            },
            _ => Pagination::Single,
        }
    }

    fn schema(&self, kind: EntityKind) -> Option<EntitySchema> {
        match kind {
            EntityKind::Manga | EntityKind::Lookup => Some(Self::manga_schema()),
            EntityKind::Chapter => Some(
                EntitySchema::new()
                    .field("sourceId", FieldSource::path("id"))
                    .field("number", FieldSource::transform("attributes.number", Transform::Number))
                    .field("volume", FieldSource::transform("attributes.volumeNumber", Transform::Number))
                    .field("title", FieldSource::transform("attributes.canonicalTitle", Transform::Text))
                    .field("pages", FieldSource::transform("attributes.length", Transform::Number))
                    .field("publishedAt", FieldSource::path("attributes.published")),
            ),
            _ => None,
        }
    }

    fn requires_id_resolution(&self) -> bool {
        true
    }

    async fn resolve_id(&self, id: &str) -> AppResult<String> {
        let id = id.trim();
        if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
            return Ok(id.to_string());
        }

        let body = self
            .client
            .get_json(
                &format!("{}/manga", self.host),
                &Self::params(&[("filter[slug]", id.to_string())]),
            )
            .await?;
        body.pointer("/data/0/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::NotFound(format!("Kitsu slug '{}'", id)))
    }

    async fn fetch_raw(&self, request: &RawRequest) -> AppResult<RawPage> {
        match request.capability {
            Capability::Metadata => self.manga(Self::require_id(request)?).await,
            Capability::Search => {
                let query = request.query.as_ref().ok_or_else(|| {
                    AppError::InvalidInput("Kitsu search without query".to_string())
                })?;
                let body = self
                    .client
                    .get_json(
                        &format!("{}/manga", self.host),
                        &Self::params(&[
                            ("filter[text]", query.title.clone()),
                            ("page[limit]", SEARCH_LIMIT.to_string()),
                        ]),
                    )
                    .await?;
                Ok(RawPage::of(array_at(&body, "data"), false))
            }
            Capability::Chapters => self.chapters(request).await,
            other => Err(AppError::NotImplemented(format!("Kitsu {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::agents::domain::schema::map_typed;
    use crate::modules::agents::domain::MangaRecord;
    use serde_json::json;

    fn agent() -> KitsuAgent {
        KitsuAgent::new("https://kitsu.io/api/edge", Duration::from_secs(60)).unwrap()
    }

    #[tokio::test]
    async fn test_numeric_ids_skip_lookup() {
        assert_eq!(agent().resolve_id(" 42 ").await.unwrap(), "42");
    }

    #[test]
    fn test_manga_schema() {
        let agent = agent();
        let schema = agent.schema(EntityKind::Manga).unwrap();
        let record: MangaRecord = map_typed(
            &json!({
                "id": "42",
                "attributes": {
                    "canonicalTitle": "Berserk",
                    "titles": {"en": "Berserk", "ja_jp": "ベルセルク"},
                    "abbreviatedTitles": null,
                    "synopsis": "Guts...",
                    "status": "current",
                    "subtype": "manga",
                    "startDate": "1989-08-25",
                    "averageRating": "85.96",
                    "chapterCount": null,
                    "posterImage": {"original": "https://media.kitsu.io/berserk.jpg"}
                },
                "genres": ["Action"]
            }),
            &schema,
            &|k: EntityKind| agent.schema(k),
        )
        .unwrap();

        assert_eq!(record.source_id, "42");
        assert_eq!(record.titles.len(), 2);
        assert!(record.alt_titles.is_empty());
        assert_eq!(record.year, Some(1989));
        assert_eq!(record.score, Some(85.96));
        assert_eq!(record.chapter_count, None);
        assert_eq!(record.genres, vec!["Action".to_string()]);
        assert_eq!(record.image(ImageKind::Poster), Some("https://media.kitsu.io/berserk.jpg"));
        assert_eq!(record.image(ImageKind::Banner), None);
    }
}
