//! AniList adapter (GraphQL)
//!
//! Scrobbling is only declared when an access token is configured.

use super::{array_at, english_text, lowercase};
use crate::modules::agents::domain::{
    Capabilities, Capability, EntityKind, EntitySchema, FieldSource, ImageKind, Transform,
};
use crate::modules::agents::infrastructure::http_client::{AgentHttpClient, RetryPolicy};
use crate::modules::agents::traits::{Agent, RateLimitConfig, RawPage, RawRequest};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const AGENT_ID: &str = "anilist";
const SEARCH_LIMIT: u32 = 20;

const MEDIA_FIELDS: &str = r#"
    id
    idMal
    title { romaji english native }
    synonyms
    description(asHtml: false)
    format
    status
    startDate { year }
    chapters
    volumes
    averageScore
    popularity
    rankings { rank allTime }
    genres
    tags { name }
    coverImage { extraLarge large }
    bannerImage
    staff { edges { role node { name { full } } } }
    characters(sort: ROLE) { edges { role node { name { full } image { large } } } }
"#;

const SCROBBLE_MUTATION: &str = r#"
mutation ($mediaId: Int, $progress: Int, $progressVolumes: Int, $status: MediaListStatus, $score: Float) {
  SaveMediaListEntry(mediaId: $mediaId, progress: $progress, progressVolumes: $progressVolumes, status: $status, score: $score) {
    id
    progress
  }
}
"#;

pub struct AniListAgent {
    client: AgentHttpClient,
    host: String,
    cache_ttl: Duration,
}

impl AniListAgent {
    pub fn new(host: &str, cache_ttl: Duration, token: Option<String>) -> AppResult<Self> {
        Ok(Self {
            client: AgentHttpClient::new("AniList", RetryPolicy::anilist())?.with_bearer(token),
            host: host.trim_end_matches('/').to_string(),
            cache_ttl,
        })
    }

    fn media_query() -> String {
        format!(
            "query ($id: Int) {{ Media(id: $id, type: MANGA) {{ {} }} }}",
            MEDIA_FIELDS
        )
    }

    fn search_query() -> String {
        format!(
            "query ($search: String, $perPage: Int) {{ Page(perPage: $perPage) {{ pageInfo {{ hasNextPage }} media(search: $search, type: MANGA) {{ {} }} }} }}",
            MEDIA_FIELDS
        )
    }

    fn recommendations_query() -> &'static str {
        r#"
query ($id: Int) {
  Media(id: $id, type: MANGA) {
    recommendations(sort: RATING_DESC) {
      nodes {
        rating
        mediaRecommendation { id title { romaji english } coverImage { large } averageScore }
      }
    }
  }
}
"#
    }

    /// POST a GraphQL document and return its `data`
    async fn graphql(&self, query: &str, variables: Value) -> AppResult<Value> {
        let body = json!({"query": query, "variables": variables});
        log::debug!("AniList: Sending GraphQL request with variables {}", variables_of(&body));

        let response = self.client.post_json(&self.host, &body).await?;

        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            let not_found = errors
                .iter()
                .any(|e| e.get("status").and_then(Value::as_u64) == Some(404));
            if not_found {
                return Err(AppError::NotFound("AniList media".to_string()));
            }
            if !errors.is_empty() {
                return Err(AppError::ApiError(format!(
                    "AniList GraphQL errors: {}",
                    Value::Array(errors.clone())
                )));
            }
        }

        response
            .get("data")
            .cloned()
            .ok_or_else(|| AppError::ApiError("No data field in AniList response".to_string()))
    }

    fn numeric_id(request: &RawRequest) -> AppResult<i64> {
        let id = request
            .id
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("AniList request without id".to_string()))?;
        Ok(id.trim().parse::<i64>()?)
    }

    fn manga_schema() -> EntitySchema {
        EntitySchema::new()
            .field("sourceId", FieldSource::transform("id", Transform::Text))
            .field("title", FieldSource::transform("title", Transform::Custom(preferred_title)))
            .field("titles", FieldSource::transform("title", Transform::Custom(localized_titles)))
            .field("altTitles", FieldSource::transform("synonyms", Transform::StringList))
            .field("synopsis", FieldSource::transform("description", Transform::Custom(english_text)))
            .field("status", FieldSource::transform("status", Transform::Custom(lowercase)))
            .field("type", FieldSource::transform("format", Transform::Custom(lowercase)))
            .field("year", FieldSource::transform("startDate", Transform::Year))
            .field("score", FieldSource::transform("averageScore", Transform::Number))
            .field("popularity", FieldSource::transform("popularity", Transform::Number))
            .field("rank", FieldSource::path("allTimeRank"))
            .field("chapterCount", FieldSource::transform("chapters", Transform::Number))
            .field("volumeCount", FieldSource::transform("volumes", Transform::Number))
            .field("genres", FieldSource::transform("genres", Transform::StringList))
            .field("tags", FieldSource::transform("tags", Transform::Pluck("name".to_string())))
            .field("authors", FieldSource::path("authors"))
            .field("artists", FieldSource::path("artists"))
            .field("cover", FieldSource::path("coverImage.extraLarge"))
            .field("banner", FieldSource::path("bannerImage"))
            .field("externalIds", FieldSource::path("externalIds"))
            .field("characters", FieldSource::nested("characters.edges", EntityKind::Character))
    }
}

#[async_trait]
impl Agent for AniListAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn capabilities(&self) -> Capabilities {
        let caps = Capability::Metadata | Capability::Search | Capability::Recommendations;
        if self.client.has_bearer() {
            caps | Capability::Scrobble
        } else {
            caps
        }
    }

    fn priority(&self) -> u32 {
        20
    }

    fn image_priority(&self, kind: ImageKind) -> u32 {
        match kind {
            ImageKind::Cover | ImageKind::Banner => 10,
            ImageKind::Poster => 20,
        }
    }

    fn rate_limit(&self) -> RateLimitConfig {
        // 30 req/min when the API runs degraded
        RateLimitConfig::per_second(0.5, 2)
    }

    fn cache_ttl(&self) -> Option<Duration> {
        Some(self.cache_ttl)
    }

    fn schema(&self, kind: EntityKind) -> Option<EntitySchema> {
        match kind {
            EntityKind::Manga | EntityKind::Lookup => Some(Self::manga_schema()),
            EntityKind::Character => Some(
                EntitySchema::new()
                    .field("name", FieldSource::path("node.name.full"))
                    .field("role", FieldSource::transform("role", Transform::Lowercase))
                    .field("image", FieldSource::path("node.image.large")),
            ),
            EntityKind::Recommendation => Some(
                EntitySchema::new()
                    .field("sourceId", FieldSource::transform("mediaRecommendation.id", Transform::Text))
                    .field("title", FieldSource::transform("mediaRecommendation.title", Transform::Custom(preferred_title)))
                    .field("score", FieldSource::transform("mediaRecommendation.averageScore", Transform::Number))
                    .field("cover", FieldSource::path("mediaRecommendation.coverImage.large")),
            ),
            EntityKind::Scrobbler => Some(
                EntitySchema::new()
                    .field("mediaId", FieldSource::transform("id", Transform::Custom(whole_number)))
                    .field("progress", FieldSource::transform("chapter", Transform::Custom(whole_number)))
                    .field("progressVolumes", FieldSource::transform("volume", Transform::Custom(whole_number)))
                    .field("status", FieldSource::transform("status", Transform::Custom(list_status)))
                    .field("score", FieldSource::path("score")),
            ),
            _ => None,
        }
    }

    fn pre_process(&self, kind: EntityKind, raw: Value) -> Value {
        match kind {
            EntityKind::Manga | EntityKind::Lookup => flatten_media(raw),
            _ => raw,
        }
    }

    async fn fetch_raw(&self, request: &RawRequest) -> AppResult<RawPage> {
        match request.capability {
            Capability::Metadata => {
                let data = self
                    .graphql(&Self::media_query(), json!({"id": Self::numeric_id(request)?}))
                    .await?;
                match data.get("Media") {
                    Some(media) if media.is_object() => Ok(RawPage::single(media.clone())),
                    _ => Err(AppError::NotFound("AniList media".to_string())),
                }
            }
            Capability::Search => {
                let query = request.query.as_ref().ok_or_else(|| {
                    AppError::InvalidInput("AniList search without query".to_string())
                })?;
                let data = self
                    .graphql(
                        &Self::search_query(),
                        json!({"search": query.title, "perPage": SEARCH_LIMIT}),
                    )
                    .await?;
                let page = data.get("Page").cloned().unwrap_or(Value::Null);
                Ok(RawPage::of(array_at(&page, "media"), false))
            }
            Capability::Recommendations => {
                let data = self
                    .graphql(
                        Self::recommendations_query(),
                        json!({"id": Self::numeric_id(request)?}),
                    )
                    .await?;
                let nodes = data
                    .pointer("/Media/recommendations/nodes")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|n| n.get("mediaRecommendation").map_or(false, Value::is_object))
                    .collect();
                Ok(RawPage::of(nodes, false))
            }
            Capability::Scrobble => {
                let variables = request.payload.clone().unwrap_or(Value::Null);
                self.graphql(SCROBBLE_MUTATION, variables).await?;
                Ok(RawPage::empty())
            }
            other => Err(AppError::NotImplemented(format!("AniList {}", other))),
        }
    }
}

fn variables_of(body: &Value) -> String {
    body.get("variables").map(Value::to_string).unwrap_or_default()
}

/// Staff split by role, all-time rank and MAL id lifted to top-level fields
fn flatten_media(mut raw: Value) -> Value {
    let mut authors = Vec::new();
    let mut artists = Vec::new();
    if let Some(edges) = raw.pointer("/staff/edges").and_then(Value::as_array) {
        for edge in edges {
            let role = edge.get("role").and_then(Value::as_str).unwrap_or_default();
            let Some(name) = edge.pointer("/node/name/full").cloned() else {
                continue;
            };
            if role.contains("Story") {
                authors.push(name.clone());
            }
            if role.contains("Art") {
                artists.push(name);
            }
        }
    }

    let all_time_rank = raw
        .get("rankings")
        .and_then(Value::as_array)
        .and_then(|r| {
            r.iter()
                .find(|r| r.get("allTime").and_then(Value::as_bool) == Some(true))
                .and_then(|r| r.get("rank").cloned())
        });

    let mut external = Map::new();
    if let Some(mal) = raw.get("idMal").and_then(Value::as_i64) {
        external.insert("mal".to_string(), Value::String(mal.to_string()));
    }

    if let Value::Object(map) = &mut raw {
        map.insert("authors".into(), Value::Array(authors));
        map.insert("artists".into(), Value::Array(artists));
        map.insert("externalIds".into(), Value::Object(external));
        if let Some(rank) = all_time_rank {
            map.insert("allTimeRank".into(), rank);
        }
    }
    raw
}

fn preferred_title(value: &Value) -> Option<Value> {
    value
        .get("english")
        .filter(|v| v.is_string())
        .or_else(|| value.get("romaji").filter(|v| v.is_string()))
        .cloned()
}

/// `{romaji, english, native}` -> locale map
fn localized_titles(value: &Value) -> Option<Value> {
    let mut titles = Map::new();
    for (field, locale) in [("english", "en"), ("romaji", "ja-ro"), ("native", "ja")] {
        if let Some(text) = value.get(field).and_then(Value::as_str) {
            titles.insert(locale.to_string(), Value::String(text.to_string()));
        }
    }
    Some(Value::Object(titles))
}

fn whole_number(value: &Value) -> Option<Value> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(Value::from(n.floor() as i64))
}

/// Free-form reading status -> AniList MediaListStatus
fn list_status(value: &Value) -> Option<Value> {
    let status = match value.as_str()?.to_lowercase().as_str() {
        "reading" | "current" => "CURRENT",
        "completed" => "COMPLETED",
        "on_hold" | "paused" => "PAUSED",
        "dropped" => "DROPPED",
        "plan_to_read" | "planning" => "PLANNING",
        _ => return None,
    };
    Some(Value::String(status.to_string()))
}
