/// Background job runtime
///
/// Jobs move through a status lifecycle inside named, lane-partitioned queues.
/// Each queue owns a pool of workers; schedulers feed queues on cron ticks.
///
/// Architecture:
/// - Domain: job entity, state machine and repository trait
/// - Infrastructure: in-memory job store
/// - Queue: lane engine, dispatch and retry timers
/// - Worker: worker trait and per-queue pool
/// - Scheduler / recurring: cron triggers and queue+scheduler units
/// - Workers: the engine's concrete job types
pub mod domain;
pub mod infrastructure;
pub mod queue;
pub mod recurring;
pub mod scheduler;
pub mod worker;
pub mod workers;

pub use domain::{
    EntityRef, FailOutcome, Job, JobDescriptor, JobLink, JobOptions, JobRecord, JobRepository,
    JobStatistics, JobStatus, QueueMode,
};
pub use infrastructure::InMemoryJobRepository;
pub use queue::{Queue, QueueConfig, QueueManager, QueueSnapshot};
pub use recurring::{RecurringInstaller, RecurringUnit};
pub use scheduler::{ScheduleTarget, Scheduler, SchedulerManager, SchedulerStats};
pub use worker::{FnWorker, Worker, WorkerPool};
