/// In-memory implementation of JobRepository
///
/// Backs stand-alone runs and tests. Records live in a `DashMap`; the link
/// table is an append-only vector behind a `RwLock`.
use crate::modules::jobs::domain::entities::JobRecord;
use crate::modules::jobs::domain::repository::{JobLink, JobRepository, JobStatistics};
use crate::modules::jobs::domain::value_objects::JobStatus;
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: DashMap<Uuid, JobRecord>,
    links: RwLock<Vec<JobLink>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn sorted(mut records: Vec<JobRecord>) -> Vec<JobRecord> {
        records.sort_by_key(|r| r.created_at);
        records
    }

    fn is_finished(record: &JobRecord) -> bool {
        match record.status {
            JobStatus::Completed | JobStatus::Delayed => true,
            JobStatus::Failed => record.next_retry_at.is_none(),
            _ => false,
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &JobRecord) -> AppResult<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(AppError::PersistenceError(format!(
                "Job {} already exists",
                job.id
            )));
        }
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &JobRecord) -> AppResult<()> {
        // Upsert: rehydrated jobs may be written before the store has seen them
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_by_id(&self, job_id: Uuid) -> AppResult<Option<JobRecord>> {
        Ok(self.jobs.get(&job_id).map(|entry| entry.value().clone()))
    }

    async fn list_by_queue(&self, queue_name: &str) -> AppResult<Vec<JobRecord>> {
        Ok(Self::sorted(
            self.jobs
                .iter()
                .filter(|entry| entry.queue_name == queue_name)
                .map(|entry| entry.value().clone())
                .collect(),
        ))
    }

    async fn list_by_status(&self, status: JobStatus) -> AppResult<Vec<JobRecord>> {
        Ok(Self::sorted(
            self.jobs
                .iter()
                .filter(|entry| entry.status == status)
                .map(|entry| entry.value().clone())
                .collect(),
        ))
    }

    async fn delete(&self, job_id: Uuid) -> AppResult<bool> {
        Ok(self.jobs.remove(&job_id).is_some())
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let stale: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|entry| Self::is_finished(entry.value()))
            .filter(|entry| entry.finished_at.unwrap_or(entry.updated_at) < cutoff)
            .map(|entry| *entry.key())
            .collect();

        for id in &stale {
            self.jobs.remove(id);
        }
        Ok(stale.len())
    }

    async fn link_entity(&self, link: JobLink) -> AppResult<()> {
        let mut links = self
            .links
            .write()
            .map_err(|e| AppError::InternalError(format!("Link table poisoned: {}", e)))?;
        links.push(link);
        Ok(())
    }

    async fn links_for_entity(&self, entity_id: &str) -> AppResult<Vec<JobLink>> {
        let links = self
            .links
            .read()
            .map_err(|e| AppError::InternalError(format!("Link table poisoned: {}", e)))?;
        Ok(links
            .iter()
            .filter(|link| link.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn latest_job_for_entity(&self, entity_id: &str) -> AppResult<Option<JobRecord>> {
        let links = self.links_for_entity(entity_id).await?;
        Ok(links
            .iter()
            .filter_map(|link| self.jobs.get(&link.job_id).map(|e| e.value().clone()))
            .max_by_key(|record| record.created_at))
    }

    async fn get_statistics(&self) -> AppResult<JobStatistics> {
        let mut stats = JobStatistics::default();
        for entry in self.jobs.iter() {
            stats.record(entry.status);
        }
        Ok(stats)
    }
}
