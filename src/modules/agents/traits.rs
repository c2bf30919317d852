use crate::modules::agents::domain::{
    Capabilities, Capability, EntityKind, EntitySchema, ImageKind, SearchQuery,
};
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Per-agent throttling: max requests in flight plus spacing between dispatches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_concurrent: usize,
    #[serde(with = "crate::modules::jobs::domain::value_objects::duration_ms")]
    pub min_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            min_interval: Duration::from_millis(500),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            min_interval,
        }
    }

    /// Derive the spacing from a requests-per-second budget
    pub fn per_second(requests_per_second: f64, max_concurrent: usize) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self::new(max_concurrent, min_interval)
    }

    pub fn requests_per_minute(&self) -> u32 {
        if self.min_interval.is_zero() {
            u32::MAX
        } else {
            (60.0 / self.min_interval.as_secs_f64()) as u32
        }
    }
}

/// How listing capabilities return their results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Pagination {
    Single,
    Paged { page_size: u32, max_pages: u32 },
}

/// One raw call against a provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequest {
    pub host: String,
    pub capability: Capability,
    pub query: Option<SearchQuery>,
    /// Id of the target entity within the provider
    pub id: Option<String>,
    pub offset: u32,
    /// Zero-based page index
    pub page: u32,
    pub limit: u32,
    pub lang: Option<String>,
    /// Body for push operations
    pub payload: Option<Value>,
}

impl RawRequest {
    pub fn new(host: impl Into<String>, capability: Capability) -> Self {
        Self {
            host: host.into(),
            capability,
            query: None,
            id: None,
            offset: 0,
            page: 0,
            limit: 0,
            lang: None,
            payload: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_query(mut self, query: SearchQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_lang(mut self, lang: Option<String>) -> Self {
        self.lang = lang;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Same request positioned on another page
    pub fn at_page(&self, page: u32, page_size: u32) -> Self {
        let mut next = self.clone();
        next.page = page;
        next.limit = page_size;
        next.offset = page * page_size;
        next
    }
}

/// Raw provider answer for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub items: Vec<Value>,
    pub has_more: bool,
}

impl RawPage {
    pub fn single(item: Value) -> Self {
        Self {
            items: vec![item],
            has_more: false,
        }
    }

    pub fn of(items: Vec<Value>, has_more: bool) -> Self {
        Self { items, has_more }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Contract every provider adapter implements
///
/// Adapters only know how to talk to their provider and how its payloads are
/// shaped. Throttling, caching, the circuit breaker and normalization are
/// applied by `ManagedAgent`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable id, also the key in external-id maps
    fn id(&self) -> &str;

    /// Base URL
    fn host(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Lower is preferred when merging
    fn priority(&self) -> u32 {
        100
    }

    /// Lower is preferred when picking a display image of this asset type
    fn image_priority(&self, _kind: ImageKind) -> u32 {
        self.priority()
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::default()
    }

    /// `None` disables response caching
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }

    fn pagination(&self, _capability: Capability) -> Pagination {
        Pagination::Single
    }

    /// Field mapping for the given entity type
    fn schema(&self, kind: EntityKind) -> Option<EntitySchema>;

    /// Whether ids coming from elsewhere must be resolved (slug -> canonical id)
    fn requires_id_resolution(&self) -> bool {
        false
    }

    async fn resolve_id(&self, id: &str) -> AppResult<String> {
        Ok(id.to_string())
    }

    /// Hook applied to each raw record before schema mapping
    fn pre_process(&self, _kind: EntityKind, raw: Value) -> Value {
        raw
    }

    /// Hook applied to each mapped record before it is typed
    fn post_process(&self, _kind: EntityKind, mapped: Value) -> Value {
        mapped
    }

    async fn fetch_raw(&self, request: &RawRequest) -> AppResult<RawPage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_from_rps() {
        let config = RateLimitConfig::per_second(2.0, 0);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.min_interval, Duration::from_millis(500));
        assert_eq!(config.requests_per_minute(), 120);
    }

    #[test]
    fn test_request_paging() {
        let request = RawRequest::new("https://example.org", Capability::Chapters).with_id("m1");
        let third = request.at_page(2, 100);
        assert_eq!(third.offset, 200);
        assert_eq!(third.limit, 100);
        assert_eq!(third.id.as_deref(), Some("m1"));
    }
}
