/// Repository trait for job persistence
///
/// The job store is an external collaborator; the engine only relies on these
/// create/read/update/delete contracts. An in-memory implementation lives in
/// `jobs::infrastructure`.
use crate::modules::jobs::domain::entities::JobRecord;
use crate::modules::jobs::domain::value_objects::JobStatus;
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a freshly built job
    async fn create(&self, job: &JobRecord) -> AppResult<()>;

    /// Overwrite the stored snapshot of a job
    async fn update(&self, job: &JobRecord) -> AppResult<()>;

    async fn get_by_id(&self, job_id: Uuid) -> AppResult<Option<JobRecord>>;

    /// All jobs of one queue, oldest first
    async fn list_by_queue(&self, queue_name: &str) -> AppResult<Vec<JobRecord>>;

    async fn list_by_status(&self, status: JobStatus) -> AppResult<Vec<JobRecord>>;

    async fn delete(&self, job_id: Uuid) -> AppResult<bool>;

    /// Delete finished jobs (completed, delayed, exhausted failures) older than `cutoff`
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize>;

    /// Append to the entity<->job link table (never rewrites existing links)
    async fn link_entity(&self, link: JobLink) -> AppResult<()>;

    async fn links_for_entity(&self, entity_id: &str) -> AppResult<Vec<JobLink>>;

    /// Most recently created job linked to the entity
    async fn latest_job_for_entity(&self, entity_id: &str) -> AppResult<Option<JobRecord>>;

    async fn get_statistics(&self) -> AppResult<JobStatistics>;
}

/// Row of the append-only entity<->job link table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLink {
    pub entity_id: String,
    pub entity_type: String,
    pub job_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Job store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatistics {
    pub backlog_count: i64,
    pub pending_count: i64,
    pub processing_count: i64,
    pub completed_count: i64,
    pub delayed_count: i64,
    pub failed_count: i64,
    pub total_count: i64,
}

impl JobStatistics {
    pub fn count_for(&self, status: JobStatus) -> i64 {
        match status {
            JobStatus::Backlog => self.backlog_count,
            JobStatus::Pending => self.pending_count,
            JobStatus::Processing => self.processing_count,
            JobStatus::Completed => self.completed_count,
            JobStatus::Delayed => self.delayed_count,
            JobStatus::Failed => self.failed_count,
        }
    }

    pub fn record(&mut self, status: JobStatus) {
        let slot = match status {
            JobStatus::Backlog => &mut self.backlog_count,
            JobStatus::Pending => &mut self.pending_count,
            JobStatus::Processing => &mut self.processing_count,
            JobStatus::Completed => &mut self.completed_count,
            JobStatus::Delayed => &mut self.delayed_count,
            JobStatus::Failed => &mut self.failed_count,
        };
        *slot += 1;
        self.total_count += 1;
    }
}
