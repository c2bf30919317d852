//! MangaUpdates adapter
//!
//! Other sources link MangaUpdates entries by their base-36 slug (as found in
//! `mangaupdates.com/series/<slug>`); the API only accepts the decimal series
//! id, so ids are resolved before every call.

use super::{array_at, english_text, lowercase, score_out_of_ten};
use crate::modules::agents::domain::{
    Capabilities, Capability, EntityKind, EntitySchema, FieldSource, ImageKind, Transform,
};
use crate::modules::agents::infrastructure::http_client::{AgentHttpClient, RetryPolicy};
use crate::modules::agents::traits::{Agent, RateLimitConfig, RawPage, RawRequest};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub const AGENT_ID: &str = "mangaupdates";
const SEARCH_LIMIT: u32 = 20;

pub struct MangaUpdatesAgent {
    client: AgentHttpClient,
    host: String,
    cache_ttl: Duration,
}

impl MangaUpdatesAgent {
    pub fn new(host: &str, cache_ttl: Duration) -> AppResult<Self> {
        Ok(Self {
            client: AgentHttpClient::new("MangaUpdates", RetryPolicy::default())?,
            host: host.trim_end_matches('/').to_string(),
            cache_ttl,
        })
    }

    async fn series(&self, request: &RawRequest) -> AppResult<Value> {
        let id = request
            .id
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("MangaUpdates request without id".to_string()))?;
        self.client
            .get_json(&format!("{}/series/{}", self.host, urlencoding::encode(id)), &[])
            .await
    }

    fn manga_schema() -> EntitySchema {
        EntitySchema::new()
            .field("sourceId", FieldSource::transform("series_id", Transform::Text))
            .field("title", FieldSource::transform("title", Transform::Text))
            .field("altTitles", FieldSource::transform("associated", Transform::Pluck("title".to_string())))
            .field("synopsis", FieldSource::transform("description", Transform::Custom(english_text)))
            .field("status", FieldSource::transform("completed", Transform::Custom(completion)))
            .field("type", FieldSource::transform("type", Transform::Custom(lowercase)))
            .field("year", FieldSource::transform("year", Transform::Year))
            .field("score", FieldSource::transform("bayesian_rating", Transform::Custom(score_out_of_ten)))
            .field("rank", FieldSource::transform("rank.position.year", Transform::Number))
            .field("chapterCount", FieldSource::transform("latest_chapter", Transform::Number))
            .field("genres", FieldSource::transform("genres", Transform::Pluck("genre".to_string())))
            .field("tags", FieldSource::transform("categories", Transform::Pluck("category".to_string())))
            .field("authors", FieldSource::path("authorNames"))
            .field("artists", FieldSource::path("artistNames"))
            .field("cover", FieldSource::path("image.url.original"))
    }
}

/// Decimal series id from either a decimal id or a base-36 slug
pub fn canonical_series_id(id: &str) -> AppResult<String> {
    let id = id.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        return Ok(id.to_string());
    }
    u64::from_str_radix(&id.to_ascii_lowercase(), 36)
        .map(|n| n.to_string())
        .map_err(|_| AppError::NotFound(format!("'{}' is not a MangaUpdates id", id)))
}

#[async_trait]
impl Agent for MangaUpdatesAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn capabilities(&self) -> Capabilities {
        Capability::Metadata | Capability::Search | Capability::Recommendations
    }

    fn priority(&self) -> u32 {
        30
    }

    fn image_priority(&self, _kind: ImageKind) -> u32 {
        40
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::per_second(1.0, 2)
    }

    fn cache_ttl(&self) -> Option<Duration> {
        Some(self.cache_ttl)
    }

    fn schema(&self, kind: EntityKind) -> Option<EntitySchema> {
        match kind {
            EntityKind::Manga => Some(Self::manga_schema()),
            EntityKind::Lookup => Some(
                EntitySchema::new()
                    .field("sourceId", FieldSource::transform("record.series_id", Transform::Text))
                    .field("title", FieldSource::transform("record.title", Transform::Text))
                    .field("altTitles", FieldSource::transform("hit_title", Transform::StringList))
                    .field("type", FieldSource::transform("record.type", Transform::Custom(lowercase)))
                    .field("year", FieldSource::transform("record.year", Transform::Year))
                    .field("score", FieldSource::transform("record.bayesian_rating", Transform::Custom(score_out_of_ten)))
                    .field("genres", FieldSource::transform("record.genres", Transform::Pluck("genre".to_string())))
                    .field("cover", FieldSource::path("record.image.url.original")),
            ),
            EntityKind::Recommendation => Some(
                EntitySchema::new()
                    .field("sourceId", FieldSource::transform("series_id", Transform::Text))
                    .field("title", FieldSource::transform("series_name", Transform::Text))
                    .field("score", FieldSource::transform("weight", Transform::Number))
                    .field("cover", FieldSource::path("series_image.url.original")),
            ),
            _ => None,
        }
    }

    fn requires_id_resolution(&self) -> bool {
        true
    }

    async fn resolve_id(&self, id: &str) -> AppResult<String> {
        canonical_series_id(id)
    }

    fn pre_process(&self, kind: EntityKind, raw: Value) -> Value {
        match kind {
            EntityKind::Manga => split_credits(raw),
            _ => raw,
        }
    }

    async fn fetch_raw(&self, request: &RawRequest) -> AppResult<RawPage> {
        match request.capability {
            Capability::Metadata => Ok(RawPage::single(self.series(request).await?)),
            Capability::Search => {
                let query = request.query.as_ref().ok_or_else(|| {
                    AppError::InvalidInput("MangaUpdates search without query".to_string())
                })?;
                let body = self
                    .client
                    .post_json(
                        &format!("{}/series/search", self.host),
                        &json!({"search": query.title, "perpage": SEARCH_LIMIT}),
                    )
                    .await?;
                Ok(RawPage::of(array_at(&body, "results"), false))
            }
            Capability::Recommendations => {
                let series = self.series(request).await?;
                Ok(RawPage::of(array_at(&series, "recommendations"), false))
            }
            other => Err(AppError::NotImplemented(format!("MangaUpdates {}", other))),
        }
    }
}

/// `authors: [{name, type}]` -> `authorNames` / `artistNames`
fn split_credits(mut raw: Value) -> Value {
    let mut authors = Vec::new();
    let mut artists = Vec::new();
    for credit in array_at(&raw, "authors") {
        let Some(name) = credit.get("name").cloned() else {
            continue;
        };
        match credit.get("type").and_then(Value::as_str) {
            Some("Artist") => artists.push(name),
            _ => authors.push(name),
        }
    }
    if let Value::Object(map) = &mut raw {
        map.insert("authorNames".into(), Value::Array(authors));
        map.insert("artistNames".into(), Value::Array(artists));
    }
    raw
}

fn completion(value: &Value) -> Option<Value> {
    let status = if value.as_bool()? { "completed" } else { "ongoing" };
    Some(Value::String(status.to_string()))
}
