/// Cross-cutting wrapper every agent call goes through
///
/// Order of concerns for one call: circuit check, id resolution, cache lookup,
/// rate-limited (and possibly paginated) raw fetch, cache fill, schema mapping.
/// The `try_*` methods surface errors; the plain methods log them and return
/// an empty result. Both count failures toward the circuit breaker, except
/// "not found" which only means the provider has nothing.
use super::cache::{CacheStats, ResponseCache};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use super::rate_limiter::AgentRateLimiter;
use crate::modules::agents::domain::schema::map_record;
use crate::modules::agents::domain::services::SearchMatcher;
use crate::modules::agents::domain::{
    Capabilities, Capability, ChapterRecord, EntityKind, ImageKind, MangaRecord, PageRecord,
    RecommendationRecord, ScrobbleUpdate, SearchQuery,
};
use crate::modules::agents::traits::{Agent, Pagination, RawPage, RawRequest};
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::{LogContext, TimedOperation};
use crate::{log_debug, log_warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct ManagedAgent {
    agent: Arc<dyn Agent>,
    limiter: AgentRateLimiter,
    cache: Option<ResponseCache>,
    breaker: CircuitBreaker,
    matcher: SearchMatcher,
}

impl ManagedAgent {
    pub fn new(agent: Arc<dyn Agent>, breaker_config: CircuitBreakerConfig) -> Self {
        let id = agent.id().to_string();
        let cache = agent
            .cache_ttl()
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| ResponseCache::new(&id, ttl));

        Self {
            limiter: AgentRateLimiter::new(&id, agent.rate_limit()),
            breaker: CircuitBreaker::new(id, breaker_config),
            cache,
            matcher: SearchMatcher::default(),
            agent,
        }
    }

    pub fn id(&self) -> &str {
        self.agent.id()
    }

    pub fn priority(&self) -> u32 {
        self.agent.priority()
    }

    pub fn image_priority(&self, kind: ImageKind) -> u32 {
        self.agent.image_priority(kind)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.agent.capabilities()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.agent.capabilities().contains(capability)
    }

    pub fn is_active(&self) -> bool {
        self.breaker.is_active()
    }

    pub fn breaker_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ResponseCache::stats)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache.as_ref().map(ResponseCache::ttl)
    }

    /// Drop expired cache entries
    pub fn purge_cache(&self) -> usize {
        self.cache
            .as_ref()
            .map(ResponseCache::purge_expired)
            .unwrap_or(0)
    }

    pub fn inner(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    // ---- surfacing variants ----

    pub async fn try_fetch_manga(&self, id: &str) -> AppResult<Option<MangaRecord>> {
        self.guarded("fetch_manga", async {
            let id = self.resolve(id).await?;
            let request = self.request(Capability::Metadata).with_id(id.clone());
            let items = self.fetch_items(request).await?;

            let mut records: Vec<MangaRecord> = self.map_items(EntityKind::Manga, items)?;
            if records.is_empty() {
                return Ok(None);
            }
            let mut record = records.swap_remove(0);
            if record.source_id.is_empty() {
                record.source_id = id.clone();
            }
            record
                .external_ids
                .insert(self.id().to_string(), record.source_id.clone());
            Ok(Some(record))
        })
        .await
        .map(Option::flatten)
    }

    pub async fn try_search(&self, query: &SearchQuery) -> AppResult<Vec<MangaRecord>> {
        self.guarded("search", async {
            let request = self
                .request(Capability::Search)
                .with_query(query.clone())
                .with_lang(query.language.clone());
            let items = self.fetch_items(request).await?;

            let kind = if self.agent.schema(EntityKind::Lookup).is_some() {
                EntityKind::Lookup
            } else {
                EntityKind::Manga
            };
            let mut records: Vec<MangaRecord> = self.map_items(kind, items)?;
            for record in records.iter_mut() {
                if !record.source_id.is_empty() {
                    record
                        .external_ids
                        .insert(self.id().to_string(), record.source_id.clone());
                }
            }

            let ranked = self.matcher.rank(query, records);
            LogContext::search_operation(&query.title, Some(self.id()), Some(ranked.len()));
            Ok(ranked.into_iter().map(|m| m.record).collect())
        })
        .await
        .map(Option::unwrap_or_default)
    }

    pub async fn try_fetch_chapters(
        &self,
        id: &str,
        lang: Option<&str>,
    ) -> AppResult<Vec<ChapterRecord>> {
        self.guarded("fetch_chapters", async {
            let id = self.resolve(id).await?;
            let request = self
                .request(Capability::Chapters)
                .with_id(id)
                .with_lang(lang.map(str::to_string));
            let items = self.fetch_items(request).await?;
            self.map_items(EntityKind::Chapter, items)
        })
        .await
        .map(Option::unwrap_or_default)
    }

    pub async fn try_fetch_pages(&self, chapter_id: &str) -> AppResult<Vec<PageRecord>> {
        self.guarded("fetch_pages", async {
            let request = self.request(Capability::Pages).with_id(chapter_id);
            let items = self.fetch_items(request).await?;
            let mut pages: Vec<PageRecord> = self.map_items(EntityKind::Page, items)?;
            pages.sort_by_key(|p| p.index);
            Ok(pages)
        })
        .await
        .map(Option::unwrap_or_default)
    }

    pub async fn try_recommendations(&self, id: &str) -> AppResult<Vec<RecommendationRecord>> {
        self.guarded("recommendations", async {
            let id = self.resolve(id).await?;
            let request = self.request(Capability::Recommendations).with_id(id);
            let items = self.fetch_items(request).await?;
            self.map_items(EntityKind::Recommendation, items)
        })
        .await
        .map(Option::unwrap_or_default)
    }

    /// Push reading progress. `Ok(false)` when the agent holds no id for the entry.
    pub async fn try_scrobble(&self, update: &ScrobbleUpdate) -> AppResult<bool> {
        let Some(raw_id) = update.ids.get(self.id()) else {
            return Ok(false);
        };

        self.guarded("scrobble", async {
            let id = self.resolve(raw_id).await?;
            let mut unified = serde_json::to_value(update)?;
            if let Value::Object(map) = &mut unified {
                map.insert("id".to_string(), Value::String(id.clone()));
            }
            let payload = match self.agent.schema(EntityKind::Scrobbler) {
                Some(schema) => map_record(&unified, &schema, &|kind: EntityKind| self.agent.schema(kind)),
                None => unified,
            };

            let request = self
                .request(Capability::Scrobble)
                .with_id(id)
                .with_payload(payload);
            self.dispatch(&request).await?;
            Ok(true)
        })
        .await
        .map(|pushed| pushed.unwrap_or(false))
    }

    // ---- swallowing variants ----

    pub async fn fetch_manga(&self, id: &str) -> Option<MangaRecord> {
        self.try_fetch_manga(id).await.unwrap_or_else(|e| self.swallow("fetch_manga", e))
    }

    pub async fn search(&self, query: &SearchQuery) -> Vec<MangaRecord> {
        self.try_search(query).await.unwrap_or_else(|e| self.swallow("search", e))
    }

    pub async fn fetch_chapters(&self, id: &str, lang: Option<&str>) -> Vec<ChapterRecord> {
        self.try_fetch_chapters(id, lang)
            .await
            .unwrap_or_else(|e| self.swallow("fetch_chapters", e))
    }

    pub async fn fetch_pages(&self, chapter_id: &str) -> Vec<PageRecord> {
        self.try_fetch_pages(chapter_id)
            .await
            .unwrap_or_else(|e| self.swallow("fetch_pages", e))
    }

    pub async fn recommendations(&self, id: &str) -> Vec<RecommendationRecord> {
        self.try_recommendations(id)
            .await
            .unwrap_or_else(|e| self.swallow("recommendations", e))
    }

    pub async fn scrobble(&self, update: &ScrobbleUpdate) -> bool {
        self.try_scrobble(update)
            .await
            .unwrap_or_else(|e| self.swallow("scrobble", e))
    }

    // ---- internals ----

    /// Circuit check, timing and breaker accounting around one logical call.
    /// A not-found answer becomes `Ok(None)` and is not counted.
    async fn guarded<T, F>(&self, operation: &str, call: F) -> AppResult<Option<T>>
    where
        F: std::future::Future<Output = AppResult<T>>,
    {
        if !self.breaker.is_active() {
            return Err(AppError::CircuitOpen(self.id().to_string()));
        }

        let timer = TimedOperation::new(&format!("{} {}", self.id(), operation));

        let result = call.await;
        let elapsed = timer.elapsed_ms();

        match result {
            Ok(value) => {
                LogContext::agent_call(self.id(), operation, "succeeded", Some(elapsed));
                Ok(Some(value))
            }
            Err(AppError::NotFound(reason)) => {
                log_debug!("{} {}: nothing found ({})", self.id(), operation, reason);
                LogContext::agent_call(self.id(), operation, "found nothing", Some(elapsed));
                Ok(None)
            }
            Err(e @ AppError::NotImplemented(_)) => Err(e),
            Err(e) => {
                LogContext::agent_call(self.id(), operation, "failed", Some(elapsed));
                self.breaker.record_error(&e.to_string());
                Err(e)
            }
        }
    }

    fn swallow<T: Default>(&self, operation: &str, error: AppError) -> T {
        log_warn!("Agent {} {} failed: {}", self.id(), operation, error);
        T::default()
    }

    fn request(&self, capability: Capability) -> RawRequest {
        RawRequest::new(self.agent.host(), capability)
    }

    async fn resolve(&self, id: &str) -> AppResult<String> {
        if !self.agent.requires_id_resolution() {
            return Ok(id.to_string());
        }
        let _permit = self.limiter.acquire().await?;
        let resolved = self.agent.resolve_id(id).await?;
        log_debug!("{} resolved '{}' to '{}'", self.id(), id, resolved);
        Ok(resolved)
    }

    /// Raw items for a request: cache first, then the (paginated) provider
    async fn fetch_items(&self, request: RawRequest) -> AppResult<Vec<Value>> {
        if !self.supports(request.capability) {
            return Err(AppError::NotImplemented(format!(
                "{} does not support {}",
                self.id(),
                request.capability
            )));
        }

        let key = self.cache.as_ref().map(|cache| cache.key_for(&request));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(items) = cache.get(key) {
                return Ok(items);
            }
        }

        let items = match self.agent.pagination(request.capability) {
            Pagination::Paged {
                page_size,
                max_pages,
            } if request.capability.is_listing() => {
                let mut items = Vec::new();
                for page in 0..max_pages.max(1) {
                    let result = self.dispatch(&request.at_page(page, page_size)).await?;
                    let exhausted = result.items.is_empty() || !result.has_more;
                    items.extend(result.items);
                    if exhausted {
                        break;
                    }
                }
                items
            }
            _ => self.dispatch(&request).await?.items,
        };

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache.insert(key, items.clone());
        }
        Ok(items)
    }

    /// One rate-limited provider round trip
    async fn dispatch(&self, request: &RawRequest) -> AppResult<RawPage> {
        let _permit = self.limiter.acquire().await?;
        self.agent.fetch_raw(request).await
    }

    /// Schema-map raw items; malformed items are skipped, all-malformed is an error
    fn map_items<T: DeserializeOwned>(&self, kind: EntityKind, items: Vec<Value>) -> AppResult<Vec<T>> {
        let schema = self.agent.schema(kind).ok_or_else(|| {
            AppError::MappingError(format!("{} declares no {} schema", self.id(), kind))
        })?;
        let nested = |k: EntityKind| self.agent.schema(k);

        let total = items.len();
        let mut mapped = Vec::with_capacity(total);
        let mut last_error = None;

        for raw in items {
            let raw = self.agent.pre_process(kind, raw);
            let value = self.agent.post_process(kind, map_record(&raw, &schema, &nested));
            match serde_json::from_value::<T>(value) {
                Ok(record) => mapped.push(record),
                Err(e) => {
                    log_warn!("{} returned a malformed {}: {}", self.id(), kind, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if mapped.is_empty() => Err(AppError::MappingError(format!(
                "{}: none of {} {} records fit the schema: {}",
                self.id(),
                total,
                kind,
                e
            ))),
            _ => Ok(mapped),
        }
    }
}

impl std::fmt::Debug for ManagedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedAgent")
            .field("id", &self.id())
            .field("capabilities", &self.capabilities())
            .field("priority", &self.priority())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::agents::domain::{EntitySchema, FieldSource};
    use crate::modules::agents::traits::RateLimitConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: answers from a closure and counts calls
    struct ScriptedAgent {
        calls: AtomicUsize,
        pages: Option<Pagination>,
        ttl: Option<Duration>,
        requests: Mutex<Vec<RawRequest>>,
        answer: fn(&RawRequest) -> AppResult<RawPage>,
    }

    impl ScriptedAgent {
        fn new(answer: fn(&RawRequest) -> AppResult<RawPage>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                pages: None,
                ttl: None,
                requests: Mutex::new(Vec::new()),
                answer,
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn id(&self) -> &str {
            "scripted"
        }

        fn host(&self) -> &str {
            "https://scripted.test"
        }

        fn capabilities(&self) -> Capabilities {
            Capability::Metadata | Capability::Chapters | Capability::Scrobble
        }

        fn rate_limit(&self) -> RateLimitConfig {
            RateLimitConfig::new(4, Duration::ZERO)
        }

        fn cache_ttl(&self) -> Option<Duration> {
            self.ttl
        }

        fn pagination(&self, _capability: Capability) -> Pagination {
            self.pages.unwrap_or(Pagination::Single)
        }

        fn schema(&self, kind: EntityKind) -> Option<EntitySchema> {
            match kind {
                EntityKind::Manga => Some(
                    EntitySchema::new()
                        .field("sourceId", FieldSource::path("id"))
                        .field("title", FieldSource::path("name"))
                        .field("year", FieldSource::path("year")),
                ),
                EntityKind::Chapter => Some(
                    EntitySchema::new()
                        .field("sourceId", FieldSource::path("id"))
                        .field("number", FieldSource::path("n")),
                ),
                EntityKind::Scrobbler => Some(
                    EntitySchema::new()
                        .field("mediaId", FieldSource::path("id"))
                        .field("progress", FieldSource::path("chapter")),
                ),
                _ => None,
            }
        }

        async fn fetch_raw(&self, request: &RawRequest) -> AppResult<RawPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .unwrap()
                .push(request.clone());
            (self.answer)(request)
        }
    }

    fn managed(agent: ScriptedAgent) -> (Arc<ScriptedAgent>, ManagedAgent) {
        let agent = Arc::new(agent);
        let managed = ManagedAgent::new(agent.clone(), CircuitBreakerConfig::default());
        (agent, managed)
    }

    #[tokio::test]
    async fn test_fetch_manga_maps_and_tags_external_id() {
        let (_, managed) = managed(ScriptedAgent::new(|_| {
            Ok(RawPage::single(json!({"id": "m-1", "name": "Foo", "year": 1999})))
        }));

        let record = managed.try_fetch_manga("m-1").await.unwrap().unwrap();
        assert_eq!(record.title.as_deref(), Some("Foo"));
        assert_eq!(record.external_ids.get("scripted").map(String::as_str), Some("m-1"));
    }

    #[tokio::test]
    async fn test_not_found_is_empty_and_not_counted() {
        let (_, managed) = managed(ScriptedAgent::new(|_| Err(AppError::NotFound("gone".into()))));

        for _ in 0..10 {
            assert!(managed.try_fetch_manga("x").await.unwrap().is_none());
        }
        assert!(managed.is_active());
        assert_eq!(managed.breaker_stats().total_errors, 0);
    }

    #[tokio::test]
    async fn test_errors_are_counted_and_swallowed() {
        let (agent, managed) = managed(ScriptedAgent::new(|_| Err(AppError::ApiError("HTTP 503".into()))));

        assert!(managed.try_fetch_manga("x").await.is_err());
        assert!(managed.fetch_manga("x").await.is_none());
        assert_eq!(managed.breaker_stats().recent_errors, 2);

        for _ in 0..4 {
            managed.fetch_manga("x").await;
        }
        assert!(!managed.is_active());

        let calls_before = agent.calls.load(Ordering::SeqCst);
        let err = managed.try_fetch_manga("x").await.unwrap_err();
        assert!(matches!(err, AppError::CircuitOpen(_)));
        assert_eq!(agent.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_pagination_walks_until_exhausted() {
        let mut agent = ScriptedAgent::new(|request| {
            let items = (0..2)
                .map(|i| json!({"id": format!("c{}-{}", request.page, i), "n": request.offset + i}))
                .collect();
            Ok(RawPage::of(items, request.page < 2))
        });
        agent.pages = Some(Pagination::Paged {
            page_size: 2,
            max_pages: 10,
        });
        let (agent, managed) = managed(agent);

        let chapters = managed.try_fetch_chapters("m-1", Some("en")).await.unwrap();
        assert_eq!(chapters.len(), 6);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
        assert_eq!(chapters[5].number, Some(5.0));
    }

    #[tokio::test]
    async fn test_pagination_respects_max_pages() {
        let mut agent = ScriptedAgent::new(|request| {
            Ok(RawPage::of(vec![json!({"id": format!("c{}", request.page)})], true))
        });
        agent.pages = Some(Pagination::Paged {
            page_size: 1,
            max_pages: 3,
        });
        let (agent, managed) = managed(agent);

        assert_eq!(managed.fetch_chapters("m-1", None).await.len(), 3);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_serves_repeated_queries() {
        let mut agent = ScriptedAgent::new(|_| Ok(RawPage::single(json!({"id": "m-1", "name": "Foo"}))));
        agent.ttl = Some(Duration::from_secs(60));
        let (agent, managed) = managed(agent);

        managed.fetch_manga("m-1").await;
        managed.fetch_manga("m-1").await;
        managed.fetch_manga("m-2").await;

        assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
        assert_eq!(managed.cache_stats().unwrap().hits, 1);
    }

    #[tokio::test]
    async fn test_malformed_items_are_skipped() {
        let (_, managed) = managed(ScriptedAgent::new(|_| {
            Ok(RawPage::of(
                vec![json!({"id": "ok", "n": 1}), json!({"id": "bad", "n": "one"})],
                false,
            ))
        }));
        let chapters = managed.try_fetch_chapters("m-1", None).await.unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].source_id, "ok");
    }

    #[tokio::test]
    async fn test_scrobble_maps_payload_through_schema() {
        let (agent, managed) = managed(ScriptedAgent::new(|_| Ok(RawPage::empty())));

        let mut update = ScrobbleUpdate {
            chapter: 12.0,
            ..ScrobbleUpdate::default()
        };
        assert!(!managed.scrobble(&update).await);

        update.ids.insert("scripted".into(), "m-9".into());
        assert!(managed.scrobble(&update).await);

        let requests = agent.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload, Some(json!({"mediaId": "m-9", "progress": 12.0})));
    }

    #[tokio::test]
    async fn test_unsupported_capability_is_not_implemented() {
        let (_, managed) = managed(ScriptedAgent::new(|_| Ok(RawPage::empty())));
        let err = managed.try_fetch_pages("c-1").await.unwrap_err();
        assert!(matches!(err, AppError::NotImplemented(_)));
    }
}
