use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Mapping error: {0}")]
    MappingError(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Circuit open for agent {0}")]
    CircuitOpen(String),

    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),

    #[error("No available worker on queue {0}")]
    NoAvailableWorker(String),

    #[error("Job {job_id} timed out after {timeout:?}")]
    Timeout {
        job_id: String,
        #[serde(skip)]
        timeout: Duration,
    },

    #[error("Job execution failed: {0}")]
    JobFailed(String),

    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Errors that mean "the provider has nothing for this", not "the provider is broken"
    pub fn is_permanent_provider_error(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_) | AppError::MappingError(_) | AppError::SerializationError(_)
        )
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::ExternalServiceError("Request timeout".to_string())
        } else if err.is_connect() {
            AppError::ExternalServiceError("Failed to connect to external service".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => AppError::RateLimitError("Too many requests".to_string()),
                404 => AppError::NotFound("External resource not found".to_string()),
                _ => AppError::ApiError(format!("HTTP {}: {}", status, err)),
            }
        } else if err.is_decode() {
            AppError::SerializationError(err.to_string())
        } else {
            AppError::ApiError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("Invalid UUID: {}", err))
    }
}

impl From<cron::error::Error> for AppError {
    fn from(err: cron::error::Error) -> Self {
        AppError::ConfigError(format!("Invalid cron expression: {}", err))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(err: std::num::ParseIntError) -> Self {
        AppError::InvalidInput(format!("Invalid number: {}", err))
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
