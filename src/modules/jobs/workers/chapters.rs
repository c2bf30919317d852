/// Chapter sync worker: download chapter listings from every agent holding an
/// id for the manga and merge them into the stored chapters
use super::{parse_payload, progress, CHAPTERS_QUEUE};
use crate::modules::agents::application::AgentsManager;
use crate::modules::jobs::domain::entities::{Job, JobDescriptor};
use crate::modules::jobs::worker::Worker;
use crate::modules::library::domain::services::ChapterMerger;
use crate::modules::library::domain::LibraryRepository;
use crate::shared::errors::{AppError, AppResult};
use crate::log_info;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSyncPayload {
    pub manga_id: Uuid,
    /// Only chapters in this language
    #[serde(default)]
    pub lang: Option<String>,
}

impl ChapterSyncPayload {
    pub fn descriptor(&self) -> AppResult<JobDescriptor> {
        Ok(JobDescriptor::new(CHAPTERS_QUEUE, serde_json::to_value(self)?)
            .for_entity(self.manga_id.to_string(), "manga"))
    }
}

pub struct ChapterSyncWorker {
    agents: Arc<AgentsManager>,
    library: Arc<dyn LibraryRepository>,
    merger: ChapterMerger,
}

impl ChapterSyncWorker {
    pub fn new(agents: Arc<AgentsManager>, library: Arc<dyn LibraryRepository>) -> Self {
        Self {
            agents,
            library,
            merger: ChapterMerger,
        }
    }
}

#[async_trait]
impl Worker for ChapterSyncWorker {
    fn name(&self) -> &str {
        "chapter-sync"
    }

    async fn process_job(&self, job: Arc<Job>) -> AppResult<Value> {
        let payload: ChapterSyncPayload = parse_payload(&job)?;
        let manga = self
            .library
            .get_manga(payload.manga_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Manga {}", payload.manga_id)))?;

        let report = self
            .agents
            .fetch_chapters(&manga.external_ids, payload.lang.as_deref(), None)
            .await;
        progress(&job, 0.5).await;

        // Nothing to merge and every agent failed: let the job retry
        if report.fulfilled.is_empty() && !report.failed.is_empty() {
            let errors: Vec<String> = report
                .failed
                .iter()
                .map(|f| format!("{}: {}", f.agent_id, f.error))
                .collect();
            return Err(AppError::ExternalServiceError(format!(
                "No chapter listing for '{}': {}",
                manga.title,
                errors.join("; ")
            )));
        }

        let sources = report.fulfilled_ids();
        let failed = report.failed.len();
        let existing = self.library.chapters_for(manga.id).await?;
        let merged = self.merger.merge(manga.id, &existing, report.into_flattened());
        self.library.save_chapters(manga.id, &merged).await?;
        progress(&job, 1.0).await;

        let added = merged.len().saturating_sub(existing.len());
        log_info!(
            "Synced {} chapters of '{}' ({} new) from {:?}",
            merged.len(),
            manga.title,
            added,
            sources
        );

        Ok(json!({
            "mangaId": manga.id,
            "chapters": merged.len(),
            "added": added,
            "sources": sources,
            "failedAgents": failed,
        }))
    }
}
