/// Domain entities for the job system
///
/// A `Job` is a shared runtime handle (`Arc<Job>`) whose status is the single
/// source of truth; queue lanes only mirror it. Every transition is validated
/// against the state machine and written through to the persistence
/// collaborator when the job is persistent.
use super::repository::{JobLink, JobRepository};
use super::value_objects::{duration_ms, JobStatus};
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::LogContext;
use crate::{log_debug, log_error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Retry and timeout policy of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub retry_interval: Duration,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Entity a job acts on (kept in a join table, not on the entity itself)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_id: String,
    pub entity_type: String,
}

fn default_persist() -> bool {
    true
}

/// Job submission contract: `{for, options?, payload, entityId?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    #[serde(rename = "for")]
    pub queue: String,
    #[serde(default)]
    pub options: Option<JobOptions>,
    pub payload: Value,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Bookkeeping jobs may opt out of durable lifecycle writes
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl JobDescriptor {
    pub fn new(queue: impl Into<String>, payload: Value) -> Self {
        Self {
            queue: queue.into(),
            options: None,
            payload,
            entity_id: None,
            entity_type: None,
            persist: true,
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn for_entity(mut self, entity_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Parse an untrusted JSON descriptor, rejecting a missing or non-string `for`
    /// and a missing payload before serde gets a chance to produce vaguer errors
    pub fn from_value(value: Value) -> AppResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            AppError::ValidationError("Job descriptor must be a JSON object".to_string())
        })?;

        match object.get("for") {
            Some(Value::String(_)) => {}
            Some(_) => {
                return Err(AppError::ValidationError(
                    "Job descriptor 'for' must be a string".to_string(),
                ))
            }
            None => {
                return Err(AppError::ValidationError(
                    "Job descriptor is missing 'for'".to_string(),
                ))
            }
        }

        if !object.contains_key("payload") {
            return Err(AppError::ValidationError(
                "Job descriptor is missing 'payload'".to_string(),
            ));
        }

        let descriptor: JobDescriptor = serde_json::from_value(value)
            .map_err(|e| AppError::ValidationError(format!("Invalid job descriptor: {}", e)))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.queue.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Job descriptor must name a target queue".to_string(),
            ));
        }

        let empty = match &self.payload {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        };
        if empty {
            return Err(AppError::ValidationError(format!(
                "Job for '{}' has an empty payload",
                self.queue
            )));
        }

        Ok(())
    }
}

/// Persisted snapshot of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub queue_name: String,
    pub payload: Value,
    pub options: JobOptions,
    pub status: JobStatus,
    pub retry_count: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub progress: Option<f64>,
    pub entity: Option<EntityRef>,
    pub persist: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Check if job can be retried
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.options.max_retries
    }
}

/// What `Job::fail` decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job goes back to backlog after `retry_in`
    RetryScheduled { retry_in: Duration, retry_count: u32 },
    /// Retries are used up; the job stays failed
    Exhausted,
}

#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    retry_count: u32,
    result: Option<Value>,
    error: Option<String>,
    progress: Option<f64>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
}

/// Runtime job handle shared between a queue's lanes and the worker running it
pub struct Job {
    id: Uuid,
    queue_name: String,
    payload: Value,
    options: JobOptions,
    entity: Option<EntityRef>,
    persist: bool,
    created_at: DateTime<Utc>,
    state: RwLock<JobState>,
    store: Option<Arc<dyn JobRepository>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("queue_name", &self.queue_name)
            .field("options", &self.options)
            .field("persist", &self.persist)
            .finish()
    }
}

impl Job {
    /// Build a job from a descriptor; malformed descriptors fail fast
    pub fn new(descriptor: JobDescriptor, store: Option<Arc<dyn JobRepository>>) -> AppResult<Self> {
        descriptor.validate()?;

        let now = Utc::now();
        let entity = descriptor.entity_id.map(|entity_id| EntityRef {
            entity_id,
            entity_type: descriptor
                .entity_type
                .unwrap_or_else(|| "manga".to_string()),
        });

        Ok(Self {
            id: Uuid::new_v4(),
            queue_name: descriptor.queue,
            payload: descriptor.payload,
            options: descriptor.options.unwrap_or_default(),
            entity,
            persist: descriptor.persist,
            created_at: now,
            state: RwLock::new(JobState {
                status: JobStatus::Backlog,
                retry_count: 0,
                result: None,
                error: None,
                progress: None,
                updated_at: now,
                finished_at: None,
                next_retry_at: None,
            }),
            store,
        })
    }

    /// Rehydrate a persisted job (crash recovery)
    pub fn from_record(record: JobRecord, store: Option<Arc<dyn JobRepository>>) -> Self {
        Self {
            id: record.id,
            queue_name: record.queue_name,
            payload: record.payload,
            options: record.options,
            entity: record.entity,
            persist: record.persist,
            created_at: record.created_at,
            state: RwLock::new(JobState {
                status: record.status,
                retry_count: record.retry_count,
                result: record.result,
                error: record.error,
                progress: record.progress,
                updated_at: record.updated_at,
                finished_at: record.finished_at,
                next_retry_at: record.next_retry_at,
            }),
            store,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    pub fn entity(&self) -> Option<&EntityRef> {
        self.entity.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether lifecycle transitions are durably written
    pub fn is_persistent(&self) -> bool {
        self.persist && self.store.is_some()
    }

    pub async fn status(&self) -> JobStatus {
        self.state.read().await.status
    }

    pub async fn retry_count(&self) -> u32 {
        self.state.read().await.retry_count
    }

    pub async fn result(&self) -> Option<Value> {
        self.state.read().await.result.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn progress(&self) -> Option<f64> {
        self.state.read().await.progress
    }

    pub async fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.next_retry_at
    }

    pub async fn snapshot(&self) -> JobRecord {
        let state = self.state.read().await;
        self.record_from(&state)
    }

    /// Persist creation (and the entity link when the job targets an entity)
    pub async fn initialize(&self) -> AppResult<()> {
        if !self.persist {
            return Ok(());
        }
        let Some(store) = &self.store else {
            return Ok(());
        };

        let record = self.snapshot().await;
        store.create(&record).await?;

        if let Some(entity) = &self.entity {
            store
                .link_entity(JobLink {
                    entity_id: entity.entity_id.clone(),
                    entity_type: entity.entity_type.clone(),
                    job_id: self.id,
                    created_at: Utc::now(),
                })
                .await?;
        }

        log_debug!("Job {} initialized on '{}'", self.id, self.queue_name);
        Ok(())
    }

    /// backlog -> pending
    pub async fn pick_up(&self, queue_name: &str) -> AppResult<()> {
        if queue_name != self.queue_name {
            return Err(AppError::InvalidTransition(format!(
                "job {} belongs to '{}', not '{}'",
                self.id, self.queue_name, queue_name
            )));
        }
        self.transition("pick up", &[JobStatus::Backlog], |state| {
            state.status = JobStatus::Pending;
        })
        .await
    }

    /// pending -> processing
    pub async fn start_processing(&self) -> AppResult<()> {
        self.transition("start", &[JobStatus::Pending], |state| {
            state.status = JobStatus::Processing;
            state.progress = Some(0.0);
        })
        .await
    }

    /// Record progress (0-100) while processing; never changes status
    pub async fn report_progress(&self, value: f64) -> AppResult<()> {
        let value = value.clamp(0.0, 100.0);
        self.transition("report progress on", &[JobStatus::Processing], |state| {
            state.progress = Some(value);
        })
        .await
    }

    /// processing -> completed
    pub async fn complete(&self, result: Value) -> AppResult<()> {
        self.transition("complete", &[JobStatus::Processing], |state| {
            state.status = JobStatus::Completed;
            state.result = Some(result);
            state.error = None;
            state.progress = Some(100.0);
            state.finished_at = Some(Utc::now());
        })
        .await
    }

    /// processing -> failed; arms a retry while `retry_count < max_retries`
    pub async fn fail(&self, error: impl Into<String>) -> AppResult<FailOutcome> {
        let error = error.into();
        let options = self.options;
        self.transition(
            "fail",
            &[JobStatus::Pending, JobStatus::Processing],
            move |state| {
                state.status = JobStatus::Failed;
                state.error = Some(error);
                if state.retry_count < options.max_retries {
                    state.retry_count += 1;
                    state.next_retry_at = chrono::Duration::from_std(options.retry_interval)
                        .ok()
                        .map(|interval| Utc::now() + interval);
                    state.finished_at = None;
                    FailOutcome::RetryScheduled {
                        retry_in: options.retry_interval,
                        retry_count: state.retry_count,
                    }
                } else {
                    state.next_retry_at = None;
                    state.finished_at = Some(Utc::now());
                    FailOutcome::Exhausted
                }
            },
        )
        .await
    }

    /// processing -> delayed (timeout); retry count is left alone
    pub async fn delay(&self) -> AppResult<()> {
        let timeout = self.options.timeout;
        self.transition("delay", &[JobStatus::Processing], move |state| {
            state.status = JobStatus::Delayed;
            state.error = Some(format!("Timed out after {:?}", timeout));
            state.finished_at = Some(Utc::now());
        })
        .await
    }

    /// failed -> backlog, only when a retry was armed by `fail`
    pub async fn reset_to_backlog(&self) -> AppResult<()> {
        {
            let state = self.state.read().await;
            if state.status == JobStatus::Failed && state.next_retry_at.is_none() {
                return Err(AppError::InvalidTransition(format!(
                    "job {} has no retry armed",
                    self.id
                )));
            }
        }
        self.transition("reset", &[JobStatus::Failed], |state| {
            state.status = JobStatus::Backlog;
            state.next_retry_at = None;
            state.result = None;
            state.progress = None;
        })
        .await
    }

    async fn transition<F, T>(&self, action: &str, allowed: &[JobStatus], apply: F) -> AppResult<T>
    where
        F: FnOnce(&mut JobState) -> T,
    {
        let (outcome, record) = {
            let mut state = self.state.write().await;
            if !allowed.contains(&state.status) {
                return Err(AppError::InvalidTransition(format!(
                    "cannot {} job {} while {}",
                    action, self.id, state.status
                )));
            }

            let from = state.status;
            let outcome = apply(&mut state);
            state.updated_at = Utc::now();

            if from != state.status {
                LogContext::job_transition(
                    &self.id.to_string(),
                    &self.queue_name,
                    &from.to_string(),
                    &state.status.to_string(),
                );
            }
            (outcome, self.record_from(&state))
        };

        self.write_through(&record).await;
        Ok(outcome)
    }

    async fn write_through(&self, record: &JobRecord) {
        if !self.persist {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.update(record).await {
                log_error!("Failed to persist job {} ({}): {}", self.id, record.status, e);
            }
        }
    }

    fn record_from(&self, state: &JobState) -> JobRecord {
        JobRecord {
            id: self.id,
            queue_name: self.queue_name.clone(),
            payload: self.payload.clone(),
            options: self.options,
            status: state.status,
            retry_count: state.retry_count,
            result: state.result.clone(),
            error: state.error.clone(),
            progress: state.progress,
            entity: self.entity.clone(),
            persist: self.persist,
            created_at: self.created_at,
            updated_at: state.updated_at,
            finished_at: state.finished_at,
            next_retry_at: state.next_retry_at,
        }
    }
}
