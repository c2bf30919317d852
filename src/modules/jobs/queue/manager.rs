/// Registry of named queues
///
/// Routes submitted descriptors to the queue named in their `for` field and
/// starts or stops every tick loop at once.
use super::queue::{Queue, QueueSnapshot, RecoveryReport};
use crate::modules::jobs::domain::entities::{Job, JobDescriptor};
use crate::shared::errors::{AppError, AppResult};
use crate::log_info;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct QueueManager {
    queues: RwLock<HashMap<String, Arc<Queue>>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue; names are unique
    pub async fn register(&self, queue: Arc<Queue>) -> AppResult<()> {
        let mut queues = self.queues.write().await;
        if queues.contains_key(queue.name()) {
            return Err(AppError::ConfigError(format!(
                "Queue '{}' is already registered",
                queue.name()
            )));
        }
        log_info!("Registered queue '{}' ({} mode)", queue.name(), queue.mode());
        queues.insert(queue.name().to_string(), queue);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Route a descriptor to its queue
    pub async fn submit(&self, descriptor: JobDescriptor) -> AppResult<Arc<Job>> {
        let queue = self.get(&descriptor.queue).await.ok_or_else(|| {
            AppError::NotFound(format!("No queue named '{}'", descriptor.queue))
        })?;
        queue.add_job(descriptor).await
    }

    /// Route an untrusted JSON descriptor to its queue
    pub async fn submit_value(&self, value: Value) -> AppResult<Arc<Job>> {
        self.submit(JobDescriptor::from_value(value)?).await
    }

    pub async fn start_all(&self) {
        for queue in self.all().await {
            queue.start().await;
        }
    }

    pub async fn stop_all(&self) {
        for queue in self.all().await {
            queue.stop().await;
        }
    }

    /// Recover every queue from the job store
    pub async fn recover_all(&self) -> AppResult<Vec<(String, RecoveryReport)>> {
        let mut reports = Vec::new();
        for queue in self.all().await {
            let report = queue.recover().await?;
            reports.push((queue.name().to_string(), report));
        }
        Ok(reports)
    }

    pub async fn snapshots(&self) -> Vec<QueueSnapshot> {
        let mut snapshots = Vec::new();
        for queue in self.all().await {
            snapshots.push(queue.snapshot().await);
        }
        snapshots
    }

    async fn all(&self) -> Vec<Arc<Queue>> {
        let queues = self.queues.read().await;
        let mut all: Vec<Arc<Queue>> = queues.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }
}
