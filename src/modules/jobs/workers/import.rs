/// Import worker: fetch a manga from every agent that knows it, reconcile the
/// answers and store the unified record
use super::{parse_payload, progress, CHAPTERS_QUEUE, IMPORT_QUEUE};
use crate::modules::agents::application::AgentsManager;
use crate::modules::agents::domain::SearchQuery;
use crate::modules::jobs::domain::entities::{Job, JobDescriptor};
use crate::modules::jobs::queue::QueueManager;
use crate::modules::jobs::worker::Worker;
use crate::modules::library::domain::{LibraryRepository, UnifiedManga};
use crate::shared::errors::{AppError, AppResult};
use crate::{log_info, log_warn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportPayload {
    /// Agent id -> manga id within that agent
    pub ids: BTreeMap<String, String>,
    /// Title to search for when no ids are known
    pub query: Option<String>,
    /// Other titles a search hit may match
    pub alt_titles: Vec<String>,
    pub year: Option<i32>,
    /// Queue a chapter sync once the manga is stored
    pub sync_chapters: bool,
}

impl ImportPayload {
    pub fn by_ids(ids: BTreeMap<String, String>) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn by_title(title: impl Into<String>) -> Self {
        Self {
            query: Some(title.into()),
            ..Self::default()
        }
    }

    /// Re-import of a stored manga: its ids, plus its titles for a search fallback
    pub fn refresh_of(manga: &UnifiedManga) -> Self {
        Self {
            ids: manga.external_ids.clone(),
            query: Some(manga.title.clone()),
            alt_titles: manga.alt_titles.clone(),
            year: manga.year,
            sync_chapters: true,
        }
    }

    /// Search input built from the title fields; `None` without a usable title
    pub fn search_query(&self) -> Option<SearchQuery> {
        let title = self.query.as_deref().unwrap_or_default().trim();
        if title.is_empty() {
            return None;
        }
        let mut query = SearchQuery::title(title).with_alt_titles(self.alt_titles.iter().cloned());
        query.year = self.year;
        Some(query)
    }

    pub fn descriptor(&self) -> AppResult<JobDescriptor> {
        Ok(JobDescriptor::new(IMPORT_QUEUE, serde_json::to_value(self)?))
    }
}

pub struct ImportWorker {
    agents: Arc<AgentsManager>,
    library: Arc<dyn LibraryRepository>,
    queues: Option<Arc<QueueManager>>,
}

impl ImportWorker {
    pub fn new(agents: Arc<AgentsManager>, library: Arc<dyn LibraryRepository>) -> Self {
        Self {
            agents,
            library,
            queues: None,
        }
    }

    /// Allow follow-up chapter sync jobs
    pub fn with_queues(mut self, queues: Arc<QueueManager>) -> Self {
        self.queues = Some(queues);
        self
    }

    /// Ids of the best search hit
    async fn ids_from_search(&self, payload: &ImportPayload) -> AppResult<BTreeMap<String, String>> {
        let query = payload.search_query().ok_or_else(|| {
            AppError::ValidationError("Import needs agent ids or a title".to_string())
        })?;

        let hits = self.agents.search_unified(&query, None).await?;
        hits.into_iter()
            .next()
            .map(|best| best.external_ids)
            .ok_or_else(|| {
                AppError::NotFound(format!("No agent found a manga titled '{}'", query.title))
            })
    }

    async fn existing(&self, ids: &BTreeMap<String, String>) -> AppResult<Option<UnifiedManga>> {
        for (agent, id) in ids {
            if let Some(found) = self.library.find_by_external_id(agent, id).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn queue_chapter_sync(&self, manga: &UnifiedManga) {
        let Some(queues) = &self.queues else {
            return;
        };
        let descriptor = JobDescriptor::new(CHAPTERS_QUEUE, json!({"mangaId": manga.id}))
            .for_entity(manga.id.to_string(), "manga");
        if let Err(e) = queues.submit(descriptor).await {
            log_warn!("Could not queue chapter sync for '{}': {}", manga.title, e);
        }
    }
}

#[async_trait]
impl Worker for ImportWorker {
    fn name(&self) -> &str {
        "import"
    }

    async fn process_job(&self, job: Arc<Job>) -> AppResult<Value> {
        let payload: ImportPayload = parse_payload(&job)?;

        let ids = if payload.ids.is_empty() {
            self.ids_from_search(&payload).await?
        } else {
            payload.ids.clone()
        };
        progress(&job, 0.2).await;

        let previous = self.existing(&ids).await?;
        let outcome = self
            .agents
            .import_manga(&ids, previous.as_ref(), None)
            .await?;
        progress(&job, 0.8).await;

        self.library.save_manga(&outcome.manga).await?;
        log_info!(
            "Imported '{}' ({}) from {:?}",
            outcome.manga.title,
            outcome.manga.id,
            outcome.sources
        );

        if payload.sync_chapters {
            self.queue_chapter_sync(&outcome.manga).await;
        }
        progress(&job, 1.0).await;

        Ok(json!({
            "mangaId": outcome.manga.id,
            "title": outcome.manga.title,
            "created": previous.is_none(),
            "sources": outcome.sources,
            "failures": outcome.failures,
            "skipped": outcome.skipped,
        }))
    }
}
