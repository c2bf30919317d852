/// Lane engine behaviour of a called-mode queue driven by hand
///
/// Tests cover:
/// - Single admission per tick
/// - Oldest-first drain and the lane invariant at quiescent points
/// - Capacity stalls when every worker is busy
/// - On-demand execution and crash recovery
/// - Immediate-mode workers picking up new jobs while a slow one runs
mod utils;

use kumo_lib::modules::jobs::domain::{Job, JobDescriptor, JobRepository, JobStatus, QueueMode};
use kumo_lib::modules::jobs::infrastructure::InMemoryJobRepository;
use kumo_lib::modules::jobs::queue::{Queue, QueueConfig};
use kumo_lib::modules::jobs::worker::{DispatchOutcome, FnWorker, Worker};
use kumo_lib::shared::errors::AppError;
use serde_json::json;
use tokio_test::assert_err;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use utils::{factories, helpers};

fn called_queue(workers: Vec<Arc<dyn Worker>>, store: Option<Arc<dyn JobRepository>>) -> Arc<Queue> {
    Queue::new("work", workers, store, QueueConfig::default()).unwrap()
}

fn recording_worker(seen: Arc<Mutex<Vec<i64>>>) -> Arc<dyn Worker> {
    Arc::new(FnWorker::new("recorder", move |job: Arc<Job>| {
        let seen = Arc::clone(&seen);
        async move {
            let n = job.payload()["n"].as_i64().unwrap_or_default();
            seen.lock().unwrap().push(n);
            Ok(json!({"n": n}))
        }
    }))
}

#[tokio::test]
async fn tick_admits_one_job_while_pending_is_empty() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = called_queue(vec![recording_worker(seen)], None);

    for n in 0..3 {
        queue
            .add_job(JobDescriptor::new("work", json!({"n": n})))
            .await
            .unwrap();
    }

    let first = queue.tick().await;
    assert!(first.promoted.is_some());
    let sizes = queue.snapshot().await.lanes;
    assert_eq!(sizes.pending, 1);
    assert_eq!(sizes.backlog, 2);

    // pending still holds a job: nothing else is admitted
    let second = queue.tick().await;
    assert!(second.promoted.is_none());
    assert_eq!(queue.snapshot().await.lanes.pending, 1);
    assert!(queue.lanes_consistent().await);
}

#[tokio::test]
async fn drain_runs_pending_oldest_first() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = called_queue(vec![recording_worker(Arc::clone(&seen))], None);

    for n in 0..3 {
        queue
            .add_job(JobDescriptor::new("work", json!({"n": n})))
            .await
            .unwrap();
    }

    for _ in 0..3 {
        queue.tick().await;
        let report = queue.process_queue().await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.succeeded, 1);
    }

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    let sizes = queue.snapshot().await.lanes;
    assert_eq!(sizes.completed, 3);
    assert_eq!(sizes.total(), 3);
    assert!(queue.lanes_consistent().await);
}

#[tokio::test]
async fn busy_pool_leaves_job_pending() {
    let release = Arc::new(Notify::new());
    let gate = Arc::clone(&release);
    let blocking: Arc<dyn Worker> = Arc::new(FnWorker::new("blocking", move |_job| {
        let gate = Arc::clone(&gate);
        async move {
            gate.notified().await;
            Ok(json!({}))
        }
    }));
    let queue = called_queue(vec![blocking], None);

    let held = queue.add_job(factories::descriptor("work")).await.unwrap();
    queue.tick().await;
    let draining = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.process_queue().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(held.status().await, JobStatus::Processing);

    let waiting = queue.add_job(factories::descriptor("work")).await.unwrap();
    queue.tick().await;
    let stalled = queue.process_queue().await;
    assert!(stalled.stalled);
    assert_eq!(stalled.dispatched, 0);
    assert_eq!(waiting.status().await, JobStatus::Pending);

    let err = assert_err!(queue.run_immediate(Arc::clone(&waiting)).await);
    assert!(matches!(err, AppError::NoAvailableWorker(_)));
    assert_eq!(waiting.status().await, JobStatus::Pending);

    release.notify_one();
    let report = draining.await.unwrap();
    assert_eq!(report.succeeded, 1);

    let report = queue.process_queue().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(waiting.status().await, JobStatus::Completed);
    assert!(queue.lanes_consistent().await);
}

#[tokio::test]
async fn run_immediate_executes_outside_the_tick_cycle() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = called_queue(vec![recording_worker(Arc::clone(&seen))], None);

    let job = queue
        .add_job(JobDescriptor::new("work", json!({"n": 42})))
        .await
        .unwrap();
    let outcome = queue.run_immediate(Arc::clone(&job)).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Completed(json!({"n": 42})));
    assert_eq!(job.status().await, JobStatus::Completed);
    assert_eq!(*seen.lock().unwrap(), vec![42]);
    assert_eq!(queue.snapshot().await.lanes.completed, 1);
}

#[tokio::test]
async fn recover_restores_unfinished_jobs_from_the_store() {
    let store: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    // first process: one job waits in backlog, one was mid-run when it died
    {
        let crashed = called_queue(vec![recording_worker(Arc::clone(&seen))], Some(Arc::clone(&store)));
        crashed.add_job(factories::descriptor("work")).await.unwrap();
        let interrupted = crashed
            .add_job(factories::descriptor("work").with_options(factories::options(1, 5_000, 1_000)))
            .await
            .unwrap();
        crashed.run_immediate(Arc::clone(&interrupted)).await.unwrap();
        // simulate a record caught mid-run
        let mut record = store.get_by_id(interrupted.id()).await.unwrap().unwrap();
        record.status = JobStatus::Processing;
        record.finished_at = None;
        store.update(&record).await.unwrap();
    }

    let restarted = called_queue(vec![recording_worker(Arc::clone(&seen))], Some(Arc::clone(&store)));
    let report = restarted.recover().await.unwrap();

    assert_eq!(report.restored, 2);
    assert_eq!(report.interrupted, 1);
    assert_eq!(report.retries_rearmed, 1);
    assert_eq!(restarted.snapshot().await.lanes.backlog, 1);
    assert!(restarted.lanes_consistent().await);
}

#[tokio::test]
async fn slow_job_does_not_hold_back_free_workers() {
    let release = Arc::new(Notify::new());
    let gate = Arc::clone(&release);
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new("gated", move |job: Arc<Job>| {
        let gate = Arc::clone(&gate);
        async move {
            if job.payload()["hold"].as_bool().unwrap_or(false) {
                gate.notified().await;
            }
            Ok(json!({}))
        }
    }));
    let config = QueueConfig {
        mode: QueueMode::Immediate,
        tick_interval: Duration::from_millis(20),
        ..QueueConfig::default()
    };
    let queue = Queue::new("work", vec![Arc::clone(&worker), worker], None, config).unwrap();
    assert!(queue.start().await);

    let slow = queue
        .add_job(JobDescriptor::new("work", json!({"hold": true})))
        .await
        .unwrap();
    assert!(helpers::wait_for_status(&slow, JobStatus::Processing, Duration::from_secs(2)).await);

    let quick = queue
        .add_job(JobDescriptor::new("work", json!({})))
        .await
        .unwrap();
    assert!(helpers::wait_for_status(&quick, JobStatus::Completed, Duration::from_secs(2)).await);

    // added after the first quick job settled, with the slow one still running
    let late = queue
        .add_job(JobDescriptor::new("work", json!({})))
        .await
        .unwrap();
    assert!(helpers::wait_for_status(&late, JobStatus::Completed, Duration::from_secs(2)).await);
    assert_eq!(slow.status().await, JobStatus::Processing);

    release.notify_one();
    assert!(helpers::wait_for_status(&slow, JobStatus::Completed, Duration::from_secs(2)).await);
    queue.stop().await;
    assert!(queue.lanes_consistent().await);
}
