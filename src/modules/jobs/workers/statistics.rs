/// Statistics worker: snapshot library counts next to the job store counts
use super::progress;
use crate::modules::jobs::domain::entities::Job;
use crate::modules::jobs::domain::repository::JobRepository;
use crate::modules::jobs::worker::Worker;
use crate::modules::library::domain::LibraryRepository;
use crate::shared::errors::AppResult;
use crate::log_debug;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct StatisticsWorker {
    library: Arc<dyn LibraryRepository>,
    jobs: Arc<dyn JobRepository>,
}

impl StatisticsWorker {
    pub fn new(library: Arc<dyn LibraryRepository>, jobs: Arc<dyn JobRepository>) -> Self {
        Self { library, jobs }
    }
}

#[async_trait]
impl Worker for StatisticsWorker {
    fn name(&self) -> &str {
        "statistics"
    }

    async fn process_job(&self, job: Arc<Job>) -> AppResult<Value> {
        let mut library = self.library.get_statistics().await?;
        library.computed_at = Some(Utc::now());
        self.library.save_statistics_snapshot(&library).await?;
        progress(&job, 0.5).await;

        let jobs = self.jobs.get_statistics().await?;
        log_debug!(
            "Statistics snapshot: {} manga, {} chapters, {} jobs",
            library.manga_count,
            library.chapter_count,
            jobs.total_count
        );

        Ok(json!({
            "library": library,
            "jobs": jobs,
        }))
    }
}
