/// Named, lane-partitioned job queue paired with a worker pool
///
/// Lane mutation happens under one async mutex so tick passes, drains and
/// retries never interleave inside a lane update. Jobs execute outside the
/// lock.
use super::lanes::{LaneSizes, Lanes};
use crate::modules::jobs::domain::entities::{FailOutcome, Job, JobDescriptor};
use crate::modules::jobs::domain::repository::JobRepository;
use crate::modules::jobs::domain::value_objects::{JobStatus, QueueMode};
use crate::modules::jobs::worker::{ClaimedWorker, DispatchOutcome, Worker, WorkerPool, WorkerStats};
use crate::shared::config::EngineConfig;
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_error, log_info, log_warn};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Queue configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub mode: QueueMode,
    /// Period of the background tick loop
    pub tick_interval: Duration,
    /// Max jobs kept in each of the completed and errors lanes
    pub retention: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::Called,
            tick_interval: Duration::from_secs(5),
            retention: 500,
        }
    }
}

impl QueueConfig {
    pub fn from_engine(config: &EngineConfig, mode: QueueMode) -> Self {
        Self {
            mode,
            tick_interval: config.queue_tick_interval,
            retention: config.finished_lane_retention,
        }
    }

    pub fn immediate() -> Self {
        Self {
            mode: QueueMode::Immediate,
            ..Self::default()
        }
    }
}

/// Result of one `process_queue` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub retries_scheduled: usize,
    /// Pending work was left behind because every worker was busy
    pub stalled: bool,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub promoted: Option<Uuid>,
    pub reconciled: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub restored: usize,
    pub retries_rearmed: usize,
    pub interrupted: usize,
}

/// Point-in-time view of a queue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub name: String,
    pub mode: QueueMode,
    pub running: bool,
    pub lanes: LaneSizes,
    pub workers: usize,
    pub busy_workers: usize,
    pub stats: WorkerStats,
}

struct Ticker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Queue {
    name: String,
    config: QueueConfig,
    lanes: Mutex<Lanes>,
    pool: WorkerPool,
    store: Option<Arc<dyn JobRepository>>,
    draining: AtomicBool,
    ticker: Mutex<Option<Ticker>>,
}

impl Queue {
    pub fn new(
        name: impl Into<String>,
        workers: Vec<Arc<dyn Worker>>,
        store: Option<Arc<dyn JobRepository>>,
        config: QueueConfig,
    ) -> AppResult<Arc<Self>> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::ConfigError("Queue name cannot be empty".to_string()));
        }
        if workers.is_empty() {
            return Err(AppError::ConfigError(format!(
                "Queue '{}' needs at least one worker",
                name
            )));
        }
        if config.tick_interval.is_zero() {
            return Err(AppError::ConfigError(format!(
                "Queue '{}' tick interval must be positive",
                name
            )));
        }

        Ok(Arc::new(Self {
            pool: WorkerPool::new(name.clone(), workers),
            name,
            config,
            lanes: Mutex::new(Lanes::new()),
            store,
            draining: AtomicBool::new(false),
            ticker: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> QueueMode {
        self.config.mode
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Build, persist and enqueue a job from a descriptor
    pub async fn add_job(self: &Arc<Self>, descriptor: JobDescriptor) -> AppResult<Arc<Job>> {
        if descriptor.queue != self.name {
            return Err(AppError::InvalidInput(format!(
                "Job for '{}' submitted to queue '{}'",
                descriptor.queue, self.name
            )));
        }

        let job = Arc::new(Job::new(descriptor, self.store.clone())?);
        job.initialize().await?;
        self.enqueue(Arc::clone(&job)).await?;
        Ok(job)
    }

    /// Append an already built backlog job
    pub async fn enqueue(self: &Arc<Self>, job: Arc<Job>) -> AppResult<()> {
        if job.queue_name() != self.name {
            return Err(AppError::InvalidInput(format!(
                "Job {} belongs to '{}', not '{}'",
                job.id(),
                job.queue_name(),
                self.name
            )));
        }

        let status = job.status().await;
        if status != JobStatus::Backlog {
            return Err(AppError::InvalidTransition(format!(
                "cannot enqueue job {} while {}",
                job.id(),
                status
            )));
        }

        {
            let mut lanes = self.lanes.lock().await;
            if lanes.contains(job.id()) {
                return Ok(());
            }
            lanes.push_back(JobStatus::Backlog, job);
        }

        if self.config.mode == QueueMode::Immediate {
            self.trigger_drain();
        }
        Ok(())
    }

    /// One engine cycle: admit a single job, reconcile lanes, and in immediate
    /// mode kick off a drain
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let (report, has_pending) = {
            let mut lanes = self.lanes.lock().await;
            let promoted = self.promote(&mut lanes, 1).await;
            let reconciled = lanes.reconcile().await;
            lanes.enforce_retention(self.config.retention).await;
            (
                TickReport {
                    promoted: promoted.first().copied(),
                    reconciled,
                },
                !lanes.is_empty(JobStatus::Pending),
            )
        };

        if report.reconciled > 0 {
            log_debug!("Queue '{}' reconciled {} jobs", self.name, report.reconciled);
        }

        if self.config.mode == QueueMode::Immediate && has_pending {
            self.trigger_drain();
        }
        report
    }

    /// Dispatch pending jobs oldest-first until pending is empty or no worker is idle.
    /// Waits for every dispatched job to settle.
    pub async fn process_queue(self: &Arc<Self>) -> DrainReport {
        let mut report = DrainReport::default();
        let claimed = {
            let mut lanes = self.lanes.lock().await;
            self.claim_pending(&mut lanes, &mut report).await
        };

        let running = claimed.into_iter().map(|(job, worker)| async move {
            let result = worker.execute(Arc::clone(&job)).await;
            (job, result)
        });
        for (job, result) in futures::future::join_all(running).await {
            self.settle(&job, result, &mut report);
        }
        self.tidy_lanes().await;

        if report.dispatched > 0 {
            log_info!(
                "Queue '{}' drained {} jobs: {} succeeded, {} failed, {} timed out",
                self.name,
                report.dispatched,
                report.succeeded,
                report.failed,
                report.timed_out
            );
        }
        report
    }

    /// Pair pending jobs, oldest first, with idle workers and move them to
    /// processing. Stops at the first job no worker is left for.
    async fn claim_pending(
        &self,
        lanes: &mut Lanes,
        report: &mut DrainReport,
    ) -> Vec<(Arc<Job>, ClaimedWorker)> {
        let mut claimed = Vec::new();
        // Bounded so a job that keeps refusing to start cannot spin the loop
        for _ in 0..lanes.lane(JobStatus::Pending).len() {
            let Some(job) = lanes.pop_front(JobStatus::Pending) else {
                break;
            };
            let Some(worker) = self.pool.try_claim() else {
                lanes.push_front(JobStatus::Pending, job);
                report.stalled = true;
                break;
            };

            if let Err(e) = job.start_processing().await {
                log_warn!("Queue '{}' skipped job {}: {}", self.name, job.id(), e);
                let status = job.status().await;
                lanes.push_back(status, job);
                continue;
            }

            lanes.push_back(JobStatus::Processing, Arc::clone(&job));
            report.dispatched += 1;
            claimed.push((job, worker));
        }
        claimed
    }

    async fn tidy_lanes(&self) {
        let mut lanes = self.lanes.lock().await;
        lanes.reconcile().await;
        lanes.enforce_retention(self.config.retention).await;
    }

    /// Run one backlog or pending job right now, outside the polling cycle
    pub async fn run_immediate(self: &Arc<Self>, job: Arc<Job>) -> AppResult<DispatchOutcome> {
        if job.queue_name() != self.name {
            return Err(AppError::InvalidInput(format!(
                "Job {} belongs to '{}', not '{}'",
                job.id(),
                job.queue_name(),
                self.name
            )));
        }

        let claimed = {
            let mut lanes = self.lanes.lock().await;
            lanes.remove(job.id());

            if job.status().await == JobStatus::Backlog {
                if let Err(e) = job.pick_up(&self.name).await {
                    lanes.push_back(job.status().await, Arc::clone(&job));
                    return Err(e);
                }
            }

            let Some(claimed) = self.pool.try_claim() else {
                lanes.push_front(job.status().await, Arc::clone(&job));
                return Err(AppError::NoAvailableWorker(self.name.clone()));
            };

            if let Err(e) = job.start_processing().await {
                lanes.push_back(job.status().await, Arc::clone(&job));
                return Err(e);
            }
            lanes.push_back(JobStatus::Processing, Arc::clone(&job));
            claimed
        };

        let result = claimed.execute(Arc::clone(&job)).await;
        let reported = result.clone();
        self.settle(&job, result, &mut DrainReport::default());

        self.lanes.lock().await.reconcile().await;
        reported
    }

    pub async fn get_job(&self, job_id: Uuid) -> Option<Arc<Job>> {
        self.lanes.lock().await.find(job_id)
    }

    /// Whether every job sits in the lane matching its status
    pub async fn lanes_consistent(&self) -> bool {
        self.lanes.lock().await.is_consistent().await
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let lanes = self.lanes.lock().await.sizes();
        QueueSnapshot {
            name: self.name.clone(),
            mode: self.config.mode,
            running: self.is_running().await,
            lanes,
            workers: self.pool.len(),
            busy_workers: self.pool.busy_count(),
            stats: self.pool.stats(),
        }
    }

    /// Start the background tick loop; returns false when already running
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(queue.config.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        queue.tick().await;
                    }
                }
            }
            log_debug!("Queue '{}' tick loop stopped", queue.name);
        });

        *ticker = Some(Ticker { token, handle });
        log_info!(
            "Queue '{}' started ({} mode, tick every {:?})",
            self.name,
            self.config.mode,
            self.config.tick_interval
        );
        true
    }

    /// Stop the tick loop. In-flight jobs and armed retries are left alone.
    pub async fn stop(&self) {
        let ticker = self.ticker.lock().await.take();
        if let Some(Ticker { token, handle }) = ticker {
            token.cancel();
            if let Err(e) = handle.await {
                log_error!("Queue '{}' tick loop ended abnormally: {}", self.name, e);
            }
            log_info!("Queue '{}' stopped", self.name);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.ticker.lock().await.is_some()
    }

    /// Reload unfinished persisted jobs of this queue after a restart.
    ///
    /// Backlog and pending jobs go back to their lanes, jobs caught mid-run are
    /// failed (which may arm a retry), and armed retries are re-scheduled from
    /// their persisted `next_retry_at`.
    pub async fn recover(self: &Arc<Self>) -> AppResult<RecoveryReport> {
        let Some(store) = &self.store else {
            return Ok(RecoveryReport::default());
        };

        let records = store.list_by_queue(&self.name).await?;
        let mut report = RecoveryReport::default();
        let mut retries = Vec::new();

        {
            let mut lanes = self.lanes.lock().await;
            for record in records {
                if lanes.contains(record.id) {
                    continue;
                }

                let status = record.status;
                let next_retry_at = record.next_retry_at;
                match status {
                    JobStatus::Completed | JobStatus::Delayed => continue,
                    JobStatus::Failed if next_retry_at.is_none() => continue,
                    _ => {}
                }

                let job = Arc::new(Job::from_record(record, Some(Arc::clone(store))));
                match status {
                    JobStatus::Backlog | JobStatus::Pending => {
                        lanes.push_back(status, job);
                    }
                    JobStatus::Processing => {
                        report.interrupted += 1;
                        let outcome = job.fail("Interrupted by restart").await?;
                        if let FailOutcome::RetryScheduled { retry_in, .. } = outcome {
                            retries.push((Arc::clone(&job), retry_in));
                        }
                        lanes.push_back(JobStatus::Failed, job);
                    }
                    _ => {
                        let remaining = next_retry_at
                            .and_then(|at| (at - Utc::now()).to_std().ok())
                            .unwrap_or(Duration::ZERO);
                        retries.push((Arc::clone(&job), remaining));
                        lanes.push_back(JobStatus::Failed, job);
                    }
                }
                report.restored += 1;
            }
        }

        report.retries_rearmed = retries.len();
        for (job, delay) in retries {
            self.schedule_retry(job, delay);
        }

        if report.restored > 0 {
            log_info!(
                "Queue '{}' recovered {} jobs ({} retries re-armed, {} interrupted)",
                self.name,
                report.restored,
                report.retries_rearmed,
                report.interrupted
            );
        }
        Ok(report)
    }

    /// Move up to `max` backlog jobs to pending, only when pending is empty
    async fn promote(&self, lanes: &mut Lanes, max: usize) -> Vec<Uuid> {
        let mut promoted = Vec::new();
        if !lanes.is_empty(JobStatus::Pending) {
            return promoted;
        }

        while promoted.len() < max {
            let Some(job) = lanes.pop_front(JobStatus::Backlog) else {
                break;
            };
            match job.pick_up(&self.name).await {
                Ok(()) => {
                    promoted.push(job.id());
                    lanes.push_back(JobStatus::Pending, job);
                }
                Err(e) => {
                    log_warn!("Queue '{}' could not promote job {}: {}", self.name, job.id(), e);
                    let status = job.status().await;
                    lanes.push_back(status, job);
                }
            }
        }
        promoted
    }

    fn settle(
        self: &Arc<Self>,
        job: &Arc<Job>,
        result: AppResult<DispatchOutcome>,
        report: &mut DrainReport,
    ) {
        match result {
            Ok(DispatchOutcome::Completed(_)) => report.succeeded += 1,
            Ok(DispatchOutcome::Failed { outcome, error }) => {
                report.failed += 1;
                match outcome {
                    FailOutcome::RetryScheduled {
                        retry_in,
                        retry_count,
                    } => {
                        report.retries_scheduled += 1;
                        log_info!(
                            "Job {} will be retried in {:?} (retry {}/{})",
                            job.id(),
                            retry_in,
                            retry_count,
                            job.options().max_retries
                        );
                        self.schedule_retry(Arc::clone(job), retry_in);
                    }
                    FailOutcome::Exhausted => {
                        log_error!(
                            "Job {} failed permanently on '{}': {}",
                            job.id(),
                            self.name,
                            error
                        );
                    }
                }
            }
            Err(AppError::Timeout { .. }) => report.timed_out += 1,
            Err(e) => {
                report.failed += 1;
                log_error!("Job {} could not be settled on '{}': {}", job.id(), self.name, e);
            }
        }
    }

    /// Deferred re-submission of a failed job
    fn schedule_retry(self: &Arc<Self>, job: Arc<Job>, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.requeue(job).await;
        });
    }

    async fn requeue(self: &Arc<Self>, job: Arc<Job>) {
        if let Err(e) = job.reset_to_backlog().await {
            log_warn!("Retry of job {} dropped: {}", job.id(), e);
            return;
        }

        {
            let mut lanes = self.lanes.lock().await;
            lanes.remove(job.id());
            lanes.push_back(JobStatus::Backlog, job);
        }

        if self.config.mode == QueueMode::Immediate {
            self.trigger_drain();
        }
    }

    /// Immediate-mode drain: admit as many backlog jobs as there are idle
    /// workers and start them, until nothing is left or all workers are busy.
    ///
    /// Each started job settles on its own task and triggers the next drain
    /// when its worker frees up, so one slow job never holds back the rest.
    fn trigger_drain(self: &Arc<Self>) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let claimed = {
                    let mut lanes = queue.lanes.lock().await;
                    let idle = queue.pool.idle_count();
                    if idle > 0 {
                        queue.promote(&mut lanes, idle).await;
                    }
                    queue.claim_pending(&mut lanes, &mut DrainReport::default()).await
                };
                if claimed.is_empty() {
                    break;
                }
                for (job, worker) in claimed {
                    queue.spawn_execution(job, worker);
                }
            }
            queue.draining.store(false, Ordering::Release);

            // Work may have landed, or a worker freed up, before the flag reset
            if queue.has_runnable_work().await {
                queue.trigger_drain();
            }
        });
    }

    fn spawn_execution(self: &Arc<Self>, job: Arc<Job>, worker: ClaimedWorker) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let result = worker.execute(Arc::clone(&job)).await;
            queue.settle(&job, result, &mut DrainReport::default());
            queue.tidy_lanes().await;
            queue.trigger_drain();
        });
    }

    async fn has_runnable_work(&self) -> bool {
        if self.pool.idle_count() == 0 {
            return false;
        }
        let lanes = self.lanes.lock().await;
        !lanes.is_empty(JobStatus::Backlog) || !lanes.is_empty(JobStatus::Pending)
    }
}
