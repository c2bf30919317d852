//! MangaDex adapter
//!
//! REST API with JSON:API shaped payloads. Related authors, artists, cover
//! art and scanlation groups arrive as `relationships` and are flattened in
//! `pre_process` so the schemas can address them with plain paths.

use super::{array_at, has_more_by_total, lowercase};
use crate::modules::agents::domain::{
    Capabilities, Capability, EntityKind, EntitySchema, FieldSource, ImageKind, Transform,
};
use crate::modules::agents::infrastructure::http_client::{AgentHttpClient, RetryPolicy};
use crate::modules::agents::traits::{Agent, Pagination, RateLimitConfig, RawPage, RawRequest};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const AGENT_ID: &str = "mangadex";
const COVER_HOST: &str = "https://uploads.mangadex.org/covers";
const SEARCH_LIMIT: u32 = 20;
const FEED_PAGE_SIZE: u32 = 100;
const FEED_MAX_PAGES: u32 = 50;

pub struct MangaDexAgent {
    client: AgentHttpClient,
    host: String,
    cache_ttl: Duration,
}

impl MangaDexAgent {
    pub fn new(host: &str, cache_ttl: Duration) -> AppResult<Self> {
        Ok(Self {
            client: AgentHttpClient::new("MangaDex", RetryPolicy::mangadex())?,
            host: host.trim_end_matches('/').to_string(),
            cache_ttl,
        })
    }

    fn includes() -> Vec<(String, String)> {
        ["author", "artist", "cover_art"]
            .iter()
            .map(|r| ("includes[]".to_string(), r.to_string()))
            .collect()
    }

    fn require_id(request: &RawRequest) -> AppResult<&str> {
        request
            .id
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("MangaDex request without id".to_string()))
    }

    async fn fetch_manga(&self, id: &str) -> AppResult<RawPage> {
        let url = format!("{}/manga/{}", self.host, urlencoding::encode(id));
        let body = self.client.get_json(&url, &Self::includes()).await?;
        match body.get("data") {
            Some(data) if data.is_object() => Ok(RawPage::single(data.clone())),
            _ => Err(AppError::NotFound(format!("MangaDex manga {}", id))),
        }
    }

    async fn search(&self, request: &RawRequest) -> AppResult<RawPage> {
        let query = request
            .query
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("MangaDex search without query".to_string()))?;

        let mut params = Self::includes();
        params.push(("title".to_string(), query.title.clone()));
        params.push(("limit".to_string(), SEARCH_LIMIT.to_string()));
        if let Some(year) = query.year {
            params.push(("year".to_string(), year.to_string()));
        }

        let body = self
            .client
            .get_json(&format!("{}/manga", self.host), &params)
            .await?;
        Ok(RawPage::of(array_at(&body, "data"), false))
    }

    async fn feed(&self, request: &RawRequest) -> AppResult<RawPage> {
        let id = Self::require_id(request)?;
        let limit = if request.limit == 0 { FEED_PAGE_SIZE } else { request.limit };

        let mut params = vec![
            ("limit".to_string(), limit.to_string()),
            ("offset".to_string(), request.offset.to_string()),
            ("order[chapter]".to_string(), "asc".to_string()),
            ("includes[]".to_string(), "scanlation_group".to_string()),
        ];
        if let Some(lang) = &request.lang {
            params.push(("translatedLanguage[]".to_string(), lang.clone()));
        }

        let url = format!("{}/manga/{}/feed", self.host, urlencoding::encode(id));
        let body = self.client.get_json(&url, &params).await?;
        let items = array_at(&body, "data");
        let has_more = has_more_by_total(&body, request.offset, items.len());
        Ok(RawPage::of(items, has_more))
    }

    async fn pages(&self, request: &RawRequest) -> AppResult<RawPage> {
        let chapter_id = Self::require_id(request)?;
        let url = format!("{}/at-home/server/{}", self.host, urlencoding::encode(chapter_id));
        let body = self.client.get_json(&url, &[]).await?;

        let base = body
            .get("baseUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::MappingError("MangaDex at-home without baseUrl".into()))?;
        let hash = body
            .pointer("/chapter/hash")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::MappingError("MangaDex at-home without hash".into()))?;

        let items = body
            .pointer("/chapter/data")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(Value::as_str)
                    .enumerate()
                    .map(|(index, file)| {
                        json!({"index": index, "url": format!("{}/data/{}/{}", base, hash, file)})
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(RawPage::of(items, false))
    }

    fn manga_schema() -> EntitySchema {
        EntitySchema::new()
            .field("sourceId", FieldSource::path("id"))
            .field("title", FieldSource::transform("attributes.title", Transform::Custom(preferred_title)))
            .field("titles", FieldSource::transform("attributes.title", Transform::LocalizedMap))
            .field("altTitles", FieldSource::transform("attributes.altTitles", Transform::Custom(all_values)))
            .field("synopsis", FieldSource::transform("attributes.description", Transform::LocalizedMap))
            .field("status", FieldSource::transform("attributes.status", Transform::Lowercase))
            .field("type", FieldSource::transform("attributes.originalLanguage", Transform::Custom(kind_from_language)))
            .field("demographic", FieldSource::transform("attributes.publicationDemographic", Transform::Custom(lowercase)))
            .field("year", FieldSource::transform("attributes.year", Transform::Year))
            .field("chapterCount", FieldSource::transform("attributes.lastChapter", Transform::Number))
            .field("volumeCount", FieldSource::transform("attributes.lastVolume", Transform::Number))
            .field("genres", FieldSource::path("genres"))
            .field("tags", FieldSource::path("tags"))
            .field("authors", FieldSource::path("authors"))
            .field("artists", FieldSource::path("artists"))
            .field("cover", FieldSource::path("cover"))
            .field("externalIds", FieldSource::transform("attributes.links", Transform::Custom(external_ids)))
    }

    fn chapter_schema() -> EntitySchema {
        EntitySchema::new()
            .field("sourceId", FieldSource::path("id"))
            .field("number", FieldSource::transform("attributes.chapter", Transform::Number))
            .field("volume", FieldSource::transform("attributes.volume", Transform::Number))
            .field("title", FieldSource::transform("attributes.title", Transform::Text))
            .field("language", FieldSource::path("attributes.translatedLanguage"))
            .field("pages", FieldSource::transform("attributes.pages", Transform::Number))
            .field("publishedAt", FieldSource::path("attributes.publishAt"))
            .field("scanlator", FieldSource::path("scanlator"))
            .field("url", FieldSource::path("attributes.externalUrl"))
    }
}

#[async_trait]
impl Agent for MangaDexAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn capabilities(&self) -> Capabilities {
        Capability::Metadata | Capability::Search | Capability::Chapters | Capability::Pages
    }

    fn priority(&self) -> u32 {
        10
    }

    fn image_priority(&self, _kind: ImageKind) -> u32 {
        20
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::per_second(4.0, 4)
    }

    fn cache_ttl(&self) -> Option<Duration> {
        Some(self.cache_ttl)
    }

    fn pagination(&self, capability: Capability) -> Pagination {
        match capability {
            Capability::Chapters => Pagination::Paged {
                page_size: FEED_PAGE_SIZE,
                max_pages: FEED_MAX_PAGES,
            },
            _ => Pagination::Single,
        }
    }

    fn schema(&self, kind: EntityKind) -> Option<EntitySchema> {
        match kind {
            EntityKind::Manga | EntityKind::Lookup => Some(Self::manga_schema()),
            EntityKind::Chapter => Some(Self::chapter_schema()),
            EntityKind::Page => Some(
                EntitySchema::new()
                    .field("index", FieldSource::path("index"))
                    .field("url", FieldSource::path("url")),
            ),
            _ => None,
        }
    }

    fn pre_process(&self, kind: EntityKind, raw: Value) -> Value {
        match kind {
            EntityKind::Manga | EntityKind::Lookup => flatten_manga(raw),
            EntityKind::Chapter => flatten_chapter(raw),
            _ => raw,
        }
    }

    async fn fetch_raw(&self, request: &RawRequest) -> AppResult<RawPage> {
        match request.capability {
            Capability::Metadata => self.fetch_manga(Self::require_id(request)?).await,
            Capability::Search => self.search(request).await,
            Capability::Chapters => self.feed(request).await,
            Capability::Pages => self.pages(request).await,
            other => Err(AppError::NotImplemented(format!("MangaDex {}", other))),
        }
    }
}

fn relationships<'a>(raw: &'a Value, kind: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    raw.get("relationships")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |r| r.get("type").and_then(Value::as_str) == Some(kind))
}

fn relationship_names(raw: &Value, kind: &str) -> Vec<Value> {
    relationships(raw, kind)
        .filter_map(|r| r.pointer("/attributes/name").cloned())
        .collect()
}

/// Authors, artists, cover and tag groups lifted out of `relationships`
fn flatten_manga(mut raw: Value) -> Value {
    let authors = relationship_names(&raw, "author");
    let artists = relationship_names(&raw, "artist");
    let cover = raw.get("id").and_then(Value::as_str).and_then(|id| {
        relationships(&raw, "cover_art")
            .find_map(|r| r.pointer("/attributes/fileName").and_then(Value::as_str))
            .map(|file| format!("{}/{}/{}", COVER_HOST, id, file))
    });

    let mut genres = Vec::new();
    let mut tags = Vec::new();
    if let Some(all) = raw.pointer("/attributes/tags").and_then(Value::as_array) {
        for tag in all {
            let Some(name) = tag.pointer("/attributes/name/en").cloned() else {
                continue;
            };
            match tag.pointer("/attributes/group").and_then(Value::as_str) {
                Some("genre") => genres.push(name),
                _ => tags.push(name),
            }
        }
    }

    if let Value::Object(map) = &mut raw {
        map.insert("authors".into(), Value::Array(authors));
        map.insert("artists".into(), Value::Array(artists));
        map.insert("genres".into(), Value::Array(genres));
        map.insert("tags".into(), Value::Array(tags));
        if let Some(cover) = cover {
            map.insert("cover".into(), Value::String(cover));
        }
    }
    raw
}

fn flatten_chapter(mut raw: Value) -> Value {
    let group = relationship_names(&raw, "scanlation_group").into_iter().next();
    if let (Value::Object(map), Some(group)) = (&mut raw, group) {
        map.insert("scanlator".into(), group);
    }
    raw
}

/// English title if present, otherwise the first one given
fn preferred_title(value: &Value) -> Option<Value> {
    let map = value.as_object()?;
    map.get("en")
        .or_else(|| map.get("ja-ro"))
        .or_else(|| map.values().next())
        .cloned()
}

/// `[{"ja": "..."}, {"en": "..."}]` -> every text
fn all_values(value: &Value) -> Option<Value> {
    let entries = value.as_array()?;
    Some(Value::Array(
        entries
            .iter()
            .filter_map(Value::as_object)
            .flat_map(|m| m.values().cloned())
            .collect(),
    ))
}

fn kind_from_language(value: &Value) -> Option<Value> {
    let kind = match value.as_str()? {
        "ja" => "manga",
        "ko" => "manhwa",
        "zh" | "zh-hk" => "manhua",
        _ => "comic",
    };
    Some(Value::String(kind.to_string()))
}

/// MangaDex `links` codes -> agent ids
fn external_ids(value: &Value) -> Option<Value> {
    let links = value.as_object()?;
    let mut ids = Map::new();
    for (code, agent) in [
        ("al", "anilist"),
        ("mu", "mangaupdates"),
        ("kt", "kitsu"),
        ("mal", "mal"),
    ] {
        if let Some(id) = links.get(code).and_then(Value::as_str) {
            ids.insert(agent.to_string(), Value::String(id.to_string()));
        }
    }
    Some(Value::Object(ids))
}
