/// Fake agent network
///
/// `FakeAgent` answers from canned raw payloads shaped like a small JSON API,
/// so every call still goes through the managed wrapper (limiter, breaker,
/// schema mapping) exactly like a real adapter.
use async_trait::async_trait;
use kumo_lib::modules::agents::domain::{EntitySchema, FieldSource};
use kumo_lib::modules::agents::{
    Agent, Capabilities, Capability, EntityKind, RateLimitConfig, RawPage, RawRequest,
};
use kumo_lib::shared::errors::{AppError, AppResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct FakeAgent {
    id: String,
    priority: u32,
    capabilities: Capabilities,
    manga: HashMap<String, Value>,
    chapters: HashMap<String, Vec<Value>>,
    search_hits: Vec<Value>,
    failing: AtomicBool,
    /// Pushes that reach the provider but whose answer is lost
    lost_pushes: AtomicUsize,
    calls: AtomicUsize,
    pushes: Mutex<Vec<Value>>,
}

impl FakeAgent {
    pub fn new(id: &str, priority: u32) -> Self {
        Self {
            id: id.to_string(),
            priority,
            capabilities: Capability::Metadata | Capability::Search | Capability::Chapters,
            manga: HashMap::new(),
            chapters: HashMap::new(),
            search_hits: Vec::new(),
            failing: AtomicBool::new(false),
            lost_pushes: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_manga(mut self, id: &str, raw: Value) -> Self {
        self.manga.insert(id.to_string(), raw);
        self
    }

    pub fn with_chapters(mut self, manga_id: &str, raw: Vec<Value>) -> Self {
        self.chapters.insert(manga_id.to_string(), raw);
        self
    }

    pub fn with_search_hits(mut self, raw: Vec<Value>) -> Self {
        self.search_hits = raw;
        self
    }

    pub fn tracking(mut self) -> Self {
        self.capabilities = self.capabilities.with(Capability::Scrobble);
        self
    }

    /// Every call errors
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// The next `count` pushes are recorded by the provider but reported as failures
    pub fn losing_answers(self, count: usize) -> Self {
        self.lost_pushes.store(count, Ordering::SeqCst);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> Vec<Value> {
        self.pushes.lock().unwrap().clone()
    }

    fn not_found(&self, what: &str, id: &Option<String>) -> AppError {
        AppError::NotFound(format!("{} {} on {}", what, id.as_deref().unwrap_or("?"), self.id))
    }
}

#[async_trait]
impl Agent for FakeAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn host(&self) -> &str {
        "https://fake.test"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(8, Duration::ZERO)
    }

    fn schema(&self, kind: EntityKind) -> Option<EntitySchema> {
        match kind {
            EntityKind::Manga | EntityKind::Lookup => Some(
                EntitySchema::new()
                    .field("sourceId", FieldSource::path("id"))
                    .field("title", FieldSource::path("title"))
                    .field("altTitles", FieldSource::path("aliases"))
                    .field("status", FieldSource::path("status"))
                    .field("year", FieldSource::path("year"))
                    .field("score", FieldSource::path("score"))
                    .field("genres", FieldSource::path("genres"))
                    .field("authors", FieldSource::path("authors"))
                    .field("cover", FieldSource::path("cover"))
                    .field("externalIds", FieldSource::path("links")),
            ),
            EntityKind::Chapter => Some(
                EntitySchema::new()
                    .field("sourceId", FieldSource::path("id"))
                    .field("number", FieldSource::path("chapter"))
                    .field("title", FieldSource::path("name"))
                    .field("language", FieldSource::path("lang"))
                    .field("pages", FieldSource::path("pages")),
            ),
            _ => None,
        }
    }

    async fn fetch_raw(&self, request: &RawRequest) -> AppResult<RawPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::ExternalServiceError(format!("{} is down", self.id)));
        }

        match request.capability {
            Capability::Metadata => {
                let id = request.id.clone().unwrap_or_default();
                self.manga
                    .get(&id)
                    .cloned()
                    .map(RawPage::single)
                    .ok_or_else(|| self.not_found("manga", &request.id))
            }
            Capability::Search => Ok(RawPage::of(self.search_hits.clone(), false)),
            Capability::Chapters => {
                let id = request.id.clone().unwrap_or_default();
                let chapters = self.chapters.get(&id).cloned().unwrap_or_default();
                let chapters = match &request.lang {
                    Some(lang) => chapters
                        .into_iter()
                        .filter(|c| c.get("lang").and_then(Value::as_str) == Some(lang))
                        .collect(),
                    None => chapters,
                };
                Ok(RawPage::of(chapters, false))
            }
            Capability::Scrobble => {
                self.pushes
                    .lock()
                    .unwrap()
                    .push(request.payload.clone().unwrap_or(Value::Null));
                let lost = self
                    .lost_pushes
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if lost {
                    return Err(AppError::ExternalServiceError(
                        "connection reset before the answer".to_string(),
                    ));
                }
                Ok(RawPage::empty())
            }
            other => Err(AppError::NotImplemented(format!("{} on {}", other, self.id))),
        }
    }
}
