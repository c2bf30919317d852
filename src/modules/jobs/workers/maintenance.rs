/// Maintenance sweep: prune finished job records and expired agent responses
use super::{parse_payload, progress, MAINTENANCE_QUEUE};
use crate::modules::agents::application::AgentsManager;
use crate::modules::jobs::domain::entities::{Job, JobDescriptor};
use crate::modules::jobs::domain::repository::JobRepository;
use crate::modules::jobs::worker::Worker;
use crate::shared::errors::AppResult;
use crate::log_info;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePayload {
    pub task: String,
    /// Overrides the configured retention
    #[serde(default)]
    pub retention_days: Option<i64>,
}

impl MaintenancePayload {
    /// Template used by the recurring sweep
    pub fn template() -> AppResult<JobDescriptor> {
        let payload = Self {
            task: "sweep".to_string(),
            retention_days: None,
        };
        Ok(JobDescriptor::new(MAINTENANCE_QUEUE, serde_json::to_value(payload)?))
    }
}

pub struct MaintenanceWorker {
    jobs: Arc<dyn JobRepository>,
    agents: Arc<AgentsManager>,
    retention: chrono::Duration,
}

impl MaintenanceWorker {
    pub fn new(jobs: Arc<dyn JobRepository>, agents: Arc<AgentsManager>, retention: chrono::Duration) -> Self {
        Self {
            jobs,
            agents,
            retention,
        }
    }
}

#[async_trait]
impl Worker for MaintenanceWorker {
    fn name(&self) -> &str {
        "maintenance"
    }

    async fn process_job(&self, job: Arc<Job>) -> AppResult<Value> {
        let payload: MaintenancePayload = parse_payload(&job)?;
        let retention = payload
            .retention_days
            .map(chrono::Duration::days)
            .unwrap_or(self.retention);

        let cutoff = Utc::now() - retention;
        let pruned = self.jobs.delete_finished_before(cutoff).await?;
        progress(&job, 0.5).await;

        let purged = self.agents.purge_caches();
        log_info!(
            "Maintenance: pruned {} finished jobs before {}, purged {} cache entries",
            pruned,
            cutoff,
            purged
        );

        Ok(json!({
            "prunedJobs": pruned,
            "purgedCacheEntries": purged,
            "cutoff": cutoff,
        }))
    }
}
