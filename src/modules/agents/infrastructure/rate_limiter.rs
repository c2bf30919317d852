use crate::modules::agents::traits::RateLimitConfig;
use crate::shared::errors::{AppError, AppResult};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Per-agent throttle: a concurrency permit plus minimum dispatch spacing
///
/// The permit is held for the whole call and released on drop. The spacing
/// is a governor quota with a burst of one.
pub struct AgentRateLimiter {
    agent_id: String,
    config: RateLimitConfig,
    permits: Arc<Semaphore>,
    spacing: Option<DefaultDirectRateLimiter>,
}

impl AgentRateLimiter {
    pub fn new(agent_id: &str, config: RateLimitConfig) -> Self {
        let spacing = Quota::with_period(config.min_interval).map(GovernorRateLimiter::direct);
        Self {
            agent_id: agent_id.to_string(),
            config,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            spacing,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Wait for a free slot and for the spacing quota
    pub async fn acquire(&self) -> AppResult<OwnedSemaphorePermit> {
        let permit = self.permits.clone().acquire_owned().await.map_err(|_| {
            AppError::InternalError(format!("Rate limiter for {} is closed", self.agent_id))
        })?;
        if let Some(spacing) = &self.spacing {
            spacing.until_ready().await;
        }
        Ok(permit)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Whether a call could be dispatched right now without waiting
    pub fn can_dispatch_now(&self) -> bool {
        self.permits.available_permits() > 0
            && self
                .spacing
                .as_ref()
                .map(|s| s.check().is_ok())
                .unwrap_or(true)
    }
}
