/// Library refresh worker: queue a re-import of every stored manga
use super::{progress, ImportPayload};
use crate::modules::jobs::domain::entities::Job;
use crate::modules::jobs::queue::QueueManager;
use crate::modules::jobs::worker::Worker;
use crate::modules::library::domain::LibraryRepository;
use crate::shared::errors::AppResult;
use crate::{log_info, log_warn};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct RefreshWorker {
    library: Arc<dyn LibraryRepository>,
    queues: Arc<QueueManager>,
}

impl RefreshWorker {
    pub fn new(library: Arc<dyn LibraryRepository>, queues: Arc<QueueManager>) -> Self {
        Self { library, queues }
    }
}

#[async_trait]
impl Worker for RefreshWorker {
    fn name(&self) -> &str {
        "library-refresh"
    }

    async fn process_job(&self, job: Arc<Job>) -> AppResult<Value> {
        let manga = self.library.list_manga().await?;
        let total = manga.len();
        let mut queued = 0usize;

        for (index, entry) in manga.iter().enumerate() {
            let payload = ImportPayload::refresh_of(entry);
            let descriptor = payload.descriptor()?.for_entity(entry.id.to_string(), "manga");
            match self.queues.submit(descriptor).await {
                Ok(_) => queued += 1,
                Err(e) => log_warn!("Refresh of '{}' not queued: {}", entry.title, e),
            }
            progress(&job, (index + 1) as f64 / total as f64).await;
        }

        log_info!("Library refresh queued {}/{} imports", queued, total);
        Ok(json!({
            "manga": total,
            "queued": queued,
        }))
    }
}
