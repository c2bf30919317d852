//! Cron-driven triggers for queues.
//!
//! A scheduler either wakes a queue (`process_queue`) or manufactures a fresh
//! job from a template on every fire. Stopping a scheduler only releases its
//! timer; jobs it already dispatched run to completion.

use crate::modules::jobs::domain::entities::JobDescriptor;
use crate::modules::jobs::queue::Queue;
use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a scheduler does when it fires
#[derive(Clone)]
pub enum ScheduleTarget {
    /// Drain the queue's pending lane
    Queue(Arc<Queue>),
    /// Build a job from the template, enqueue it and run it
    Template {
        queue: Arc<Queue>,
        template: JobDescriptor,
    },
}

impl ScheduleTarget {
    fn queue(&self) -> &Arc<Queue> {
        match self {
            ScheduleTarget::Queue(queue) => queue,
            ScheduleTarget::Template { queue, .. } => queue,
        }
    }
}

/// Broadcast on every fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub scheduler: String,
    pub queue: String,
    pub fired_at: DateTime<Utc>,
}

/// Scheduler statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub name: String,
    pub cron: String,
    pub running: bool,
    pub runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Accept 5-field (minute precision) and 6/7-field (leading seconds) expressions
pub fn normalize_cron(expr: &str) -> AppResult<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(AppError::ConfigError(format!(
            "Cron expression '{}' has {} fields, expected 5 or 6",
            expr, n
        ))),
    }
}

/// Parse a cron expression after normalization.
pub fn parse_cron(expr: &str) -> AppResult<Schedule> {
    let normalized = normalize_cron(expr)?;
    Ok(Schedule::from_str(&normalized)?)
}

struct Runner {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    name: String,
    cron: String,
    schedule: Schedule,
    timezone: Tz,
    target: ScheduleTarget,
    last_run: RwLock<Option<DateTime<Utc>>>,
    runs: AtomicU64,
    events: broadcast::Sender<TriggerEvent>,
    runner: Mutex<Option<Runner>>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("cron", &self.cron)
            .field("timezone", &self.timezone)
            .field("queue", &self.target.queue().name())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler; a bad cron expression is a configuration error.
    pub fn new(
        name: impl Into<String>,
        cron_expr: &str,
        timezone: Tz,
        target: ScheduleTarget,
    ) -> AppResult<Arc<Self>> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::ConfigError(
                "Scheduler name cannot be empty".to_string(),
            ));
        }

        if let ScheduleTarget::Template { queue, template } = &target {
            template.validate()?;
            if template.queue != queue.name() {
                return Err(AppError::ConfigError(format!(
                    "Scheduler '{}' template targets '{}' but is bound to '{}'",
                    name,
                    template.queue,
                    queue.name()
                )));
            }
        }

        let schedule = parse_cron(cron_expr).map_err(|e| {
            AppError::ConfigError(format!("Scheduler '{}': {}", name, e))
        })?;
        let (events, _) = broadcast::channel(16);

        Ok(Arc::new(Self {
            name,
            cron: cron_expr.trim().to_string(),
            schedule,
            timezone,
            target,
            last_run: RwLock::new(None),
            runs: AtomicU64::new(0),
            events,
            runner: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cron(&self) -> &str {
        &self.cron
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Subscribe to fire events.
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.events.subscribe()
    }

    /// Next fire time after now, evaluated in the scheduler's time zone.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run_after(Utc::now())
    }

    pub fn next_run_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }

    pub async fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.read().await
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Arm the cron rule.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(AppError::SchedulerError(format!(
                "Scheduler '{}' was destroyed",
                self.name
            )));
        }

        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut after = Utc::now();
            loop {
                let Some(next) = scheduler.next_run_after(after) else {
                    warn!(scheduler = %scheduler.name, "Cron rule has no upcoming fire time");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        // Never fire the same slot twice, never replay missed slots
                        after = next.max(Utc::now());
                        let fired = Arc::clone(&scheduler);
                        tokio::spawn(async move { fired.fire().await });
                    }
                }
            }
            debug!(scheduler = %scheduler.name, "Cron loop exited");
        });

        *runner = Some(Runner { token, handle });
        info!(
            scheduler = %self.name,
            cron = %self.cron,
            timezone = %self.timezone,
            queue = %self.target.queue().name(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Release the timer. Jobs already dispatched keep running.
    pub async fn stop(&self) {
        let runner = self.runner.lock().await.take();
        if let Some(Runner { token, handle }) = runner {
            token.cancel();
            if let Err(e) = handle.await {
                error!(scheduler = %self.name, error = %e, "Cron loop ended abnormally");
            }
            info!(scheduler = %self.name, "Scheduler stopped");
        }
    }

    /// Stop and refuse any further start.
    pub async fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.stop().await;
    }

    /// Run one fire now: record it, broadcast it and act on the target.
    pub async fn fire(&self) {
        let fired_at = Utc::now();
        *self.last_run.write().await = Some(fired_at);
        self.runs.fetch_add(1, Ordering::Relaxed);

        let queue = self.target.queue();
        // No subscribers is fine
        let _ = self.events.send(TriggerEvent {
            scheduler: self.name.clone(),
            queue: queue.name().to_string(),
            fired_at,
        });
        debug!(scheduler = %self.name, queue = %queue.name(), "Scheduler fired");

        match &self.target {
            ScheduleTarget::Queue(queue) => {
                queue.process_queue().await;
            }
            ScheduleTarget::Template { queue, template } => {
                let job = match queue.add_job(template.clone()).await {
                    Ok(job) => job,
                    Err(e) => {
                        error!(scheduler = %self.name, error = %e, "Failed to build job from template");
                        return;
                    }
                };
                if let Err(e) = queue.run_immediate(job).await {
                    warn!(scheduler = %self.name, error = %e, "Templated job did not complete");
                }
                queue.process_queue().await;
            }
        }
    }

    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            name: self.name.clone(),
            cron: self.cron.clone(),
            running: self.is_running().await,
            runs: self.runs(),
            last_run: self.last_run().await,
            next_run: self.next_run(),
        }
    }
}

/// Holds schedulers by unique name.
#[derive(Default)]
pub struct SchedulerManager {
    schedulers: RwLock<HashMap<String, Arc<Scheduler>>>,
}

impl SchedulerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, scheduler: Arc<Scheduler>) -> AppResult<()> {
        let mut schedulers = self.schedulers.write().await;
        if schedulers.contains_key(scheduler.name()) {
            return Err(AppError::ConfigError(format!(
                "Scheduler '{}' is already registered",
                scheduler.name()
            )));
        }
        info!(scheduler = %scheduler.name(), cron = %scheduler.cron(), "Registered scheduler");
        schedulers.insert(scheduler.name().to_string(), scheduler);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Scheduler>> {
        self.schedulers.read().await.get(name).cloned()
    }

    /// Destroy and forget a scheduler.
    pub async fn remove(&self, name: &str) -> Option<Arc<Scheduler>> {
        let removed = self.schedulers.write().await.remove(name);
        if let Some(scheduler) = &removed {
            scheduler.destroy().await;
        }
        removed
    }

    pub async fn start_all(&self) -> AppResult<()> {
        for scheduler in self.all().await {
            scheduler.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        for scheduler in self.all().await {
            scheduler.stop().await;
        }
    }

    pub async fn stats(&self) -> Vec<SchedulerStats> {
        let mut stats = Vec::new();
        for scheduler in self.all().await {
            stats.push(scheduler.stats().await);
        }
        stats
    }

    async fn all(&self) -> Vec<Arc<Scheduler>> {
        let mut all: Vec<Arc<Scheduler>> = self.schedulers.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::queue::QueueConfig;
    use crate::modules::jobs::worker::{FnWorker, Worker};
    use chrono::{TimeZone, Timelike};
    use serde_json::json;

    fn queue() -> Arc<Queue> {
        let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("noop", |_| async { Ok(json!("ok")) }));
        Queue::new("maintenance", vec![worker], None, QueueConfig::default()).unwrap()
    }

    #[test]
    fn test_normalize_cron() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_cron("30 0 3 * * *").unwrap(), "30 0 3 * * *");
        assert!(normalize_cron("* * *").is_err());
        assert!(parse_cron("0 3 * * *").is_ok());
        assert!(parse_cron("not a cron at all").is_err());
    }

    #[test]
    fn test_invalid_cron_is_config_error() {
        let err = Scheduler::new("bad", "61 * * * *", Tz::UTC, ScheduleTarget::Queue(queue()))
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_next_run_respects_timezone() {
        let scheduler = Scheduler::new(
            "nightly",
            "0 3 * * *",
            chrono_tz::Asia::Tokyo,
            ScheduleTarget::Queue(queue()),
        )
        .unwrap();

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = scheduler.next_run_after(from).unwrap();
        // 03:00 JST is 18:00 UTC the previous day
        assert_eq!(next.hour(), 18);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap());
    }

    #[test]
    fn test_template_must_target_bound_queue() {
        let err = Scheduler::new(
            "mismatch",
            "* * * * *",
            Tz::UTC,
            ScheduleTarget::Template {
                queue: queue(),
                template: JobDescriptor::new("import", json!({"a": 1})),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_fire_records_and_broadcasts() {
        let scheduler = Scheduler::new(
            "sweep",
            "0 3 * * *",
            Tz::UTC,
            ScheduleTarget::Template {
                queue: queue(),
                template: JobDescriptor::new("maintenance", json!({"task": "sweep"})),
            },
        )
        .unwrap();
        let mut events = scheduler.subscribe();

        assert!(scheduler.last_run().await.is_none());
        scheduler.fire().await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.scheduler, "sweep");
        assert_eq!(event.queue, "maintenance");
        assert!(scheduler.last_run().await.is_some());
        assert_eq!(scheduler.runs(), 1);

        let snapshot = scheduler.target.queue().snapshot().await;
        assert_eq!(snapshot.lanes.completed, 1);
    }

    #[tokio::test]
    async fn test_destroyed_scheduler_cannot_restart() {
        let scheduler =
            Scheduler::new("once", "0 3 * * *", Tz::UTC, ScheduleTarget::Queue(queue())).unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);

        scheduler.destroy().await;
        assert!(!scheduler.is_running().await);
        assert!(scheduler.start().await.is_err());
    }

    #[tokio::test]
    async fn test_manager_rejects_duplicates() {
        let manager = SchedulerManager::new();
        let make = || Scheduler::new("dup", "* * * * *", Tz::UTC, ScheduleTarget::Queue(queue())).unwrap();
        manager.register(make()).await.unwrap();
        assert!(matches!(
            manager.register(make()).await,
            Err(AppError::ConfigError(_))
        ));
        assert!(manager.remove("dup").await.is_some());
        assert!(manager.get("dup").await.is_none());
    }
}
