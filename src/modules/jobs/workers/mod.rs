/// Concrete job types
///
/// Each worker owns one queue's business logic. Payloads are typed structs
/// parsed from the job's opaque JSON; a payload that does not parse fails the
/// job like any other error.
pub mod chapters;
pub mod import;
pub mod maintenance;
pub mod refresh;
pub mod statistics;
pub mod sync;

pub use chapters::{ChapterSyncPayload, ChapterSyncWorker};
pub use import::{ImportPayload, ImportWorker};
pub use maintenance::{MaintenancePayload, MaintenanceWorker};
pub use refresh::RefreshWorker;
pub use statistics::StatisticsWorker;
pub use sync::SyncWorker;

use crate::log_debug;
use crate::modules::jobs::domain::entities::Job;
use crate::shared::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;

pub const IMPORT_QUEUE: &str = "import";
pub const CHAPTERS_QUEUE: &str = "chapters";
pub const REFRESH_QUEUE: &str = "refresh";
pub const MAINTENANCE_QUEUE: &str = "maintenance";
pub const STATISTICS_QUEUE: &str = "statistics";
pub const SYNC_QUEUE: &str = "sync";

/// Typed view of a job payload
pub(crate) fn parse_payload<T: DeserializeOwned>(job: &Job) -> AppResult<T> {
    serde_json::from_value(job.payload().clone()).map_err(|e| {
        AppError::ValidationError(format!(
            "Job {} on '{}' has an invalid payload: {}",
            job.id(),
            job.queue_name(),
            e
        ))
    })
}

/// Report progress as a fraction of the work done (0..1). Stored as a percentage.
/// Progress is informational; a job not in `processing` just skips it
pub(crate) async fn progress(job: &Job, fraction: f64) {
    if let Err(e) = job.report_progress(fraction * 100.0).await {
        log_debug!("Progress for job {} not recorded: {}", job.id(), e);
    }
}
