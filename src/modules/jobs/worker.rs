/// Workers and the per-queue worker pool
///
/// A worker implements one job type's business logic and runs exactly one job
/// at a time. The pool wraps each worker in a slot guarded by an atomic busy
/// flag; claiming a slot is a single compare-exchange and the flag is released
/// by a drop guard, so success, failure, timeout and cancellation all free it.
use crate::modules::jobs::domain::entities::{FailOutcome, Job};
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_warn};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Business logic for one job type
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Run the job; progress may be reported through `job.report_progress`
    async fn process_job(&self, job: Arc<Job>) -> AppResult<Value>;
}

/// Closure-backed worker for small job types and tests
pub struct FnWorker<F> {
    name: String,
    handler: F,
}

impl<F, Fut> FnWorker<F>
where
    F: Fn(Arc<Job>) -> Fut + Send + Sync,
    Fut: Future<Output = AppResult<Value>> + Send,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(Arc<Job>) -> Fut + Send + Sync,
    Fut: Future<Output = AppResult<Value>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_job(&self, job: Arc<Job>) -> AppResult<Value> {
        (self.handler)(job).await
    }
}

/// What happened to a dispatched job that did not time out
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed(Value),
    Failed { error: String, outcome: FailOutcome },
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

struct WorkerSlot {
    worker: Arc<dyn Worker>,
    busy: AtomicBool,
}

/// Resets the busy flag of a claimed slot when dropped
struct BusyGuard {
    slot: Arc<WorkerSlot>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

/// A slot claimed for exactly one job
pub struct ClaimedWorker {
    guard: BusyGuard,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl ClaimedWorker {
    pub fn worker_name(&self) -> &str {
        self.guard.slot.worker.name()
    }

    /// Race the worker against the job timeout and record the outcome on the job.
    /// The job must already be processing.
    ///
    /// On timeout the worker future is dropped and `AppError::Timeout` is returned.
    pub async fn execute(self, job: Arc<Job>) -> AppResult<DispatchOutcome> {
        let worker = Arc::clone(&self.guard.slot.worker);
        let timeout = job.timeout();

        log_debug!(
            "Worker '{}' picked job {} on '{}'",
            worker.name(),
            job.id(),
            job.queue_name()
        );

        let result = tokio::time::timeout(timeout, worker.process_job(Arc::clone(&job))).await;

        match result {
            Ok(Ok(value)) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                job.complete(value.clone()).await?;
                Ok(DispatchOutcome::Completed(value))
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                let error = e.to_string();
                log_warn!("Job {} failed on '{}': {}", job.id(), worker.name(), error);
                let outcome = job.fail(error.clone()).await?;
                Ok(DispatchOutcome::Failed { error, outcome })
            }
            Err(_) => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                log_warn!(
                    "Job {} timed out after {:?} on '{}'",
                    job.id(),
                    timeout,
                    worker.name()
                );
                job.delay().await?;
                Err(AppError::Timeout {
                    job_id: job.id().to_string(),
                    timeout,
                })
            }
        }
    }
}

/// Fixed set of workers serving one queue
pub struct WorkerPool {
    queue_name: String,
    slots: Vec<Arc<WorkerSlot>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(queue_name: impl Into<String>, workers: Vec<Arc<dyn Worker>>) -> Self {
        Self {
            queue_name: queue_name.into(),
            slots: workers
                .into_iter()
                .map(|worker| {
                    Arc::new(WorkerSlot {
                        worker,
                        busy: AtomicBool::new(false),
                    })
                })
                .collect(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn busy_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.busy.load(Ordering::Acquire))
            .count()
    }

    pub fn idle_count(&self) -> usize {
        self.len() - self.busy_count()
    }

    /// Claim the first idle slot, if any
    pub fn try_claim(&self) -> Option<ClaimedWorker> {
        self.slots.iter().find_map(|slot| {
            slot.busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| ClaimedWorker {
                    guard: BusyGuard {
                        slot: Arc::clone(slot),
                    },
                    counters: Arc::clone(&self.counters),
                })
        })
    }

    /// Claim a worker, move the job to processing and run it.
    ///
    /// Fails with `NoAvailableWorker` when every slot is busy; the job is left
    /// untouched so the caller can try again on the next tick.
    pub async fn assign_job_to_worker(&self, job: Arc<Job>) -> AppResult<DispatchOutcome> {
        let claimed = self
            .try_claim()
            .ok_or_else(|| AppError::NoAvailableWorker(self.queue_name.clone()))?;
        job.start_processing().await?;
        claimed.execute(job).await
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::domain::entities::{JobDescriptor, JobOptions};
    use crate::modules::jobs::domain::value_objects::JobStatus;
    use serde_json::json;
    use std::time::Duration;

    async fn pending_job(options: JobOptions) -> Arc<Job> {
        let job = Job::new(
            JobDescriptor::new("test", json!({"n": 1})).with_options(options),
            None,
        )
        .unwrap();
        job.pick_up("test").await.unwrap();
        Arc::new(job)
    }

    fn worker<F, Fut>(handler: F) -> Arc<dyn Worker>
    where
        F: Fn(Arc<Job>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<Value>> + Send + 'static,
    {
        Arc::new(FnWorker::new("test-worker", handler))
    }

    #[tokio::test]
    async fn test_success_completes_job_and_releases_slot() {
        let pool = WorkerPool::new("test", vec![worker(|_| async { Ok(json!({"done": 1})) })]);
        let job = pending_job(JobOptions::default()).await;

        let outcome = pool.assign_job_to_worker(Arc::clone(&job)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Completed(json!({"done": 1})));
        assert_eq!(job.status().await, JobStatus::Completed);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_error_fails_job_and_releases_slot() {
        let pool = WorkerPool::new(
            "test",
            vec![worker(|_| async { Err(AppError::JobFailed("nope".into())) })],
        );
        let job = pending_job(JobOptions::default()).await;

        let outcome = pool.assign_job_to_worker(Arc::clone(&job)).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                outcome: FailOutcome::RetryScheduled { retry_count: 1, .. },
                ..
            }
        ));
        assert_eq!(job.status().await, JobStatus::Failed);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_delays_job_and_releases_slot() {
        let pool = WorkerPool::new(
            "test",
            vec![worker(|_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            })],
        );
        let job = pending_job(JobOptions {
            timeout: Duration::from_millis(50),
            ..JobOptions::default()
        })
        .await;

        let err = pool.assign_job_to_worker(Arc::clone(&job)).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout { .. }));
        assert_eq!(job.status().await, JobStatus::Delayed);
        assert_eq!(job.retry_count().await, 0);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_busy_pool_rejects_assignment() {
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let pool = Arc::new(WorkerPool::new(
            "test",
            vec![worker(move |_| {
                let mut rx = release_rx.clone();
                async move {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                    Ok(json!("released"))
                }
            })],
        ));

        let first = pending_job(JobOptions::default()).await;
        let running = {
            let pool = Arc::clone(&pool);
            let job = Arc::clone(&first);
            tokio::spawn(async move { pool.assign_job_to_worker(job).await })
        };

        while pool.busy_count() == 0 {
            tokio::task::yield_now().await;
        }

        let second = pending_job(JobOptions::default()).await;
        let err = pool.assign_job_to_worker(Arc::clone(&second)).await.unwrap_err();
        assert!(matches!(err, AppError::NoAvailableWorker(q) if q == "test"));
        assert_eq!(second.status().await, JobStatus::Pending);

        release_tx.send(true).unwrap();
        running.await.unwrap().unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let pool = WorkerPool::new(
            "test",
            vec![
                worker(|_| async { Ok(json!(1)) }),
                worker(|_| async { Ok(json!(2)) }),
            ],
        );

        let a = pool.try_claim().unwrap();
        let b = pool.try_claim().unwrap();
        assert!(pool.try_claim().is_none());
        assert_eq!(pool.busy_count(), 2);

        drop(a);
        assert_eq!(pool.idle_count(), 1);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
    }
}
