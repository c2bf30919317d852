/// External sync worker: push pending reading progress to tracking agents
use super::progress;
use crate::modules::agents::application::AgentsManager;
use crate::modules::agents::domain::ScrobbleUpdate;
use crate::modules::jobs::domain::entities::Job;
use crate::modules::jobs::worker::Worker;
use crate::modules::library::domain::{LibraryRepository, ReadingProgress};
use crate::shared::errors::AppResult;
use crate::{log_info, log_warn};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct SyncWorker {
    agents: Arc<AgentsManager>,
    library: Arc<dyn LibraryRepository>,
}

impl SyncWorker {
    pub fn new(agents: Arc<AgentsManager>, library: Arc<dyn LibraryRepository>) -> Self {
        Self { agents, library }
    }

    /// Returns whether the entry counts as delivered
    async fn push(&self, entry: &ReadingProgress) -> AppResult<bool> {
        let Some(manga) = self.library.get_manga(entry.manga_id).await? else {
            log_warn!("Progress for unknown manga {} left pending", entry.manga_id);
            return Ok(false);
        };

        let update = ScrobbleUpdate {
            ids: manga.external_ids.clone(),
            chapter: entry.chapter,
            volume: entry.volume,
            status: entry.status.clone(),
            score: entry.score,
        };
        let report = self.agents.scrobble(&update, None).await;

        // A push any tracker accepted is delivered; so is one no tracker failed
        let accepted = report.fulfilled.iter().any(|r| r.value);
        let delivered = accepted || report.failed.is_empty();
        if delivered {
            self.library.mark_scrobbled(entry.manga_id, Utc::now()).await?;
        } else {
            log_warn!(
                "Scrobble of '{}' failed on {} agents, will retry",
                manga.title,
                report.failed.len()
            );
        }
        Ok(delivered)
    }
}

#[async_trait]
impl Worker for SyncWorker {
    fn name(&self) -> &str {
        "external-sync"
    }

    async fn process_job(&self, job: Arc<Job>) -> AppResult<Value> {
        let pending = self.library.pending_scrobbles().await?;
        let total = pending.len();
        let mut delivered = 0usize;

        for (index, entry) in pending.iter().enumerate() {
            if self.push(entry).await? {
                delivered += 1;
            }
            progress(&job, (index + 1) as f64 / total as f64).await;
        }

        if total > 0 {
            log_info!("External sync delivered {}/{} progress updates", delivered, total);
        }
        Ok(json!({
            "pending": total,
            "delivered": delivered,
        }))
    }
}
