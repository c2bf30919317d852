/// Recurring units: a queue, its workers and the cron trigger that feeds it
///
/// A unit without a template wakes its queue on every fire; with a template it
/// manufactures a fresh job each time.
use crate::modules::jobs::domain::entities::JobDescriptor;
use crate::modules::jobs::domain::repository::JobRepository;
use crate::modules::jobs::domain::value_objects::QueueMode;
use crate::modules::jobs::queue::{Queue, QueueConfig, QueueManager};
use crate::modules::jobs::scheduler::{ScheduleTarget, Scheduler, SchedulerManager};
use crate::modules::jobs::worker::Worker;
use crate::shared::errors::AppResult;
use crate::log_info;
use chrono_tz::Tz;
use std::sync::Arc;

pub struct RecurringUnit {
    pub queue_name: String,
    pub workers: Vec<Arc<dyn Worker>>,
    pub scheduler_name: String,
    pub cron: String,
    pub template: Option<JobDescriptor>,
    pub mode: QueueMode,
}

impl RecurringUnit {
    pub fn new(
        queue_name: impl Into<String>,
        worker: Arc<dyn Worker>,
        scheduler_name: impl Into<String>,
        cron: impl Into<String>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            workers: vec![worker],
            scheduler_name: scheduler_name.into(),
            cron: cron.into(),
            template: None,
            mode: QueueMode::Called,
        }
    }

    pub fn with_template(mut self, template: JobDescriptor) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_mode(mut self, mode: QueueMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Builds the queue and scheduler of each unit and registers both
pub struct RecurringInstaller<'a> {
    queues: &'a QueueManager,
    schedulers: &'a SchedulerManager,
    store: Option<Arc<dyn JobRepository>>,
    base: QueueConfig,
    timezone: Tz,
}

impl<'a> RecurringInstaller<'a> {
    pub fn new(
        queues: &'a QueueManager,
        schedulers: &'a SchedulerManager,
        store: Option<Arc<dyn JobRepository>>,
        base: QueueConfig,
        timezone: Tz,
    ) -> Self {
        Self {
            queues,
            schedulers,
            store,
            base,
            timezone,
        }
    }

    /// Duplicate names and bad cron expressions surface here
    pub async fn install(&self, unit: RecurringUnit) -> AppResult<Arc<Scheduler>> {
        let config = QueueConfig {
            mode: unit.mode,
            ..self.base.clone()
        };
        let queue = Queue::new(unit.queue_name.clone(), unit.workers, self.store.clone(), config)?;

        let target = match unit.template {
            Some(template) => ScheduleTarget::Template {
                queue: Arc::clone(&queue),
                template,
            },
            None => ScheduleTarget::Queue(Arc::clone(&queue)),
        };
        let scheduler = Scheduler::new(unit.scheduler_name, &unit.cron, self.timezone, target)?;

        self.queues.register(queue).await?;
        self.schedulers.register(Arc::clone(&scheduler)).await?;
        log_info!(
            "Recurring unit '{}' -> queue '{}' on '{}'",
            scheduler.name(),
            unit.queue_name,
            unit.cron
        );
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::worker::FnWorker;
    use serde_json::json;

    fn worker() -> Arc<dyn Worker> {
        Arc::new(FnWorker::new("noop", |_job| async { Ok(json!({})) }))
    }

    #[tokio::test]
    async fn test_install_registers_queue_and_scheduler() {
        let queues = QueueManager::new();
        let schedulers = SchedulerManager::new();
        let installer = RecurringInstaller::new(&queues, &schedulers, None, QueueConfig::default(), chrono_tz::UTC);

        let unit = RecurringUnit::new("stats", worker(), "stats-tick", "*/30 * * * *")
            .with_template(JobDescriptor::new("stats", json!({"scope": "all"})));
        installer.install(unit).await.unwrap();

        assert!(queues.get("stats").await.is_some());
        assert!(schedulers.get("stats-tick").await.is_some());
    }

    #[tokio::test]
    async fn test_bad_cron_registers_nothing() {
        let queues = QueueManager::new();
        let schedulers = SchedulerManager::new();
        let installer = RecurringInstaller::new(&queues, &schedulers, None, QueueConfig::default(), chrono_tz::UTC);

        let unit = RecurringUnit::new("stats", worker(), "stats-tick", "not a cron");
        assert!(installer.install(unit).await.is_err());
        assert!(queues.get("stats").await.is_none());
    }

    #[tokio::test]
    async fn test_template_for_other_queue_rejected() {
        let queues = QueueManager::new();
        let schedulers = SchedulerManager::new();
        let installer = RecurringInstaller::new(&queues, &schedulers, None, QueueConfig::default(), chrono_tz::UTC);

        let unit = RecurringUnit::new("stats", worker(), "stats-tick", "0 * * * *")
            .with_template(JobDescriptor::new("elsewhere", json!({"x": 1})));
        assert!(installer.install(unit).await.is_err());
    }
}
