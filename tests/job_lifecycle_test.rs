/// Job lifecycle through a real queue
///
/// Tests cover:
/// - Retry bound (max_retries + 1 attempts, no extra retry)
/// - Timeout turning a job into `delayed` without a retry
/// - Write-through persistence and the entity link table
/// - Descriptor validation at submission
mod utils;

use kumo_lib::modules::jobs::domain::{JobDescriptor, JobRepository, JobStatus, QueueMode};
use kumo_lib::modules::jobs::infrastructure::InMemoryJobRepository;
use kumo_lib::modules::jobs::queue::{Queue, QueueConfig, QueueManager};
use kumo_lib::modules::jobs::worker::{FnWorker, Worker};
use kumo_lib::shared::errors::AppError;
use serde_json::json;
use tokio_test::assert_err;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use utils::{factories, helpers};

fn immediate_queue(name: &str, worker: Arc<dyn Worker>, store: Option<Arc<dyn JobRepository>>) -> Arc<Queue> {
    let config = QueueConfig {
        mode: QueueMode::Immediate,
        tick_interval: Duration::from_millis(20),
        retention: 100,
    };
    Queue::new(name, vec![worker], store, config).unwrap()
}

// ================================================================================================
// RETRY AND TIMEOUT
// ================================================================================================

#[tokio::test]
async fn always_failing_job_stops_after_max_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("flaky", move |_job| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::ExternalServiceError("provider down".to_string()))
        }
    }));
    let queue = immediate_queue("flaky", worker, None);

    let job = queue
        .add_job(factories::descriptor("flaky").with_options(factories::options(2, 100, 1_000)))
        .await
        .unwrap();

    let settled = helpers::wait_until(Duration::from_secs(3), || {
        let attempts = Arc::clone(&attempts);
        async move { attempts.load(Ordering::SeqCst) == 3 }
    })
    .await;
    assert!(settled, "expected three attempts");
    assert!(helpers::wait_for_status(&job, JobStatus::Failed, Duration::from_secs(1)).await);

    // no third retry arrives after another interval
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(job.status().await, JobStatus::Failed);
    assert_eq!(job.retry_count().await, 2);
    assert!(job.next_retry_at().await.is_none());
    assert!(queue.lanes_consistent().await);
}

#[tokio::test]
async fn job_exceeding_timeout_is_delayed_without_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("stuck", move |_job| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({}))
        }
    }));
    let queue = immediate_queue("stuck", worker, None);

    let job = queue
        .add_job(factories::descriptor("stuck").with_options(factories::options(3, 50, 50)))
        .await
        .unwrap();

    assert!(helpers::wait_for_status(&job, JobStatus::Delayed, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(job.status().await, JobStatus::Delayed);
    assert_eq!(job.retry_count().await, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let snapshot = queue.snapshot().await;
    assert_eq!(snapshot.stats.timed_out, 1);
    assert_eq!(snapshot.busy_workers, 0, "timeout must release the worker");
}

#[tokio::test]
async fn retry_that_succeeds_completes_the_job() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("second-time", move |_job| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AppError::ExternalServiceError("first call fails".to_string()))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }));
    let queue = immediate_queue("second-time", worker, None);

    let job = queue
        .add_job(factories::descriptor("second-time").with_options(factories::options(2, 50, 1_000)))
        .await
        .unwrap();

    assert!(helpers::wait_for_status(&job, JobStatus::Completed, Duration::from_secs(2)).await);
    assert_eq!(job.retry_count().await, 1);
    assert_eq!(job.result().await, Some(json!({"ok": true})));
}

// ================================================================================================
// PERSISTENCE
// ================================================================================================

#[tokio::test]
async fn lifecycle_writes_through_to_the_store() {
    let store = Arc::new(InMemoryJobRepository::new());
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("echo", |job| async move {
        Ok(job.payload().clone())
    }));
    let queue = immediate_queue("echo", worker, Some(store.clone()));

    let job = queue
        .add_job(JobDescriptor::new("echo", json!({"n": 7})).for_entity("manga-1", "manga"))
        .await
        .unwrap();
    assert!(helpers::wait_for_status(&job, JobStatus::Completed, Duration::from_secs(2)).await);

    let stored = store.get_by_id(job.id()).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result, Some(json!({"n": 7})));
    assert!(stored.finished_at.is_some());

    let links = store.links_for_entity("manga-1").await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].job_id, job.id());
    let latest = store.latest_job_for_entity("manga-1").await.unwrap().unwrap();
    assert_eq!(latest.id, job.id());
}

#[tokio::test]
async fn transient_jobs_are_not_persisted() {
    let store = Arc::new(InMemoryJobRepository::new());
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("quiet", |_job| async { Ok(json!({})) }));
    let queue = immediate_queue("quiet", worker, Some(store.clone()));

    let job = queue
        .add_job(factories::descriptor("quiet").transient())
        .await
        .unwrap();
    assert!(helpers::wait_for_status(&job, JobStatus::Completed, Duration::from_secs(2)).await);
    assert!(store.get_by_id(job.id()).await.unwrap().is_none());
}

// ================================================================================================
// SUBMISSION
// ================================================================================================

#[tokio::test]
async fn malformed_descriptors_are_rejected_before_enqueue() {
    let manager = QueueManager::new();
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("noop", |_job| async { Ok(json!({})) }));
    manager.register(immediate_queue("noop", worker, None)).await.unwrap();

    for bad in [
        json!({"payload": {"a": 1}}),
        json!({"for": 42, "payload": {"a": 1}}),
        json!({"for": "noop"}),
        json!({"for": "noop", "payload": {}}),
    ] {
        let err = assert_err!(manager.submit_value(bad.clone()).await);
        assert!(matches!(err, AppError::ValidationError(_)), "{} gave {:?}", bad, err);
    }

    let unknown = assert_err!(
        manager
            .submit_value(json!({"for": "nowhere", "payload": {"a": 1}}))
            .await
    );
    assert!(matches!(unknown, AppError::NotFound(_)));

    let snapshot = manager.get("noop").await.unwrap().snapshot().await;
    assert_eq!(snapshot.lanes.total(), 0);
}

#[tokio::test]
async fn options_are_read_in_milliseconds() {
    let manager = QueueManager::new();
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("noop", |_job| async { Ok(json!({})) }));
    let config = QueueConfig::default();
    manager
        .register(Queue::new("noop", vec![worker], None, config).unwrap())
        .await
        .unwrap();

    let job = manager
        .submit_value(json!({
            "for": "noop",
            "options": {"maxRetries": 1, "retryInterval": 250, "timeout": 1500},
            "payload": {"a": 1},
            "entityId": "m-9"
        }))
        .await
        .unwrap();

    assert_eq!(job.options().max_retries, 1);
    assert_eq!(job.options().retry_interval, Duration::from_millis(250));
    assert_eq!(job.timeout(), Duration::from_millis(1500));
    assert_eq!(job.entity().map(|e| e.entity_id.as_str()), Some("m-9"));
    assert_eq!(job.status().await, JobStatus::Backlog);
}
