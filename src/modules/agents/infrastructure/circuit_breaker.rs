//! Sliding-window circuit breaker for agents
//!
//! ```text
//! ACTIVE --[more than `threshold` errors inside `window`]--> INACTIVE
//! INACTIVE --[`cooldown` elapsed, checked lazily]--> ACTIVE (window cleared)
//! ```
//!
//! An inactive agent is skipped by the orchestrator, never unregistered.

use crate::shared::config::EngineConfig;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Active,
    Inactive,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Active => write!(f, "active"),
            CircuitState::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// How far back errors are counted
    pub window: Duration,
    /// Errors tolerated inside the window; one more deactivates
    pub threshold: usize,
    /// How long an agent stays inactive
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(600),
            threshold: 5,
            cooldown: Duration::from_secs(600),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            window: config.breaker_window,
            threshold: config.breaker_threshold,
            cooldown: config.breaker_cooldown,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    errors: VecDeque<Instant>,
    deactivated_at: Option<Instant>,
    last_error_message: Option<String>,
    total_errors: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Errors currently inside the window
    pub recent_errors: usize,
    pub total_errors: u64,
    pub last_error: Option<String>,
    pub time_until_reactivation: Option<Duration>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitBreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitBreakerInner {
                state: CircuitState::Active,
                errors: VecDeque::new(),
                deactivated_at: None,
                last_error_message: None,
                total_errors: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state; reactivates lazily once the cooldown has elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_reactivate(&mut inner);
        inner.state
    }

    pub fn is_active(&self) -> bool {
        self.state() == CircuitState::Active
    }

    /// Count one failed call
    pub fn record_error(&self, message: &str) {
        let mut inner = self.lock();
        let now = Instant::now();

        inner.errors.push_back(now);
        inner.total_errors += 1;
        inner.last_error_message = Some(message.to_string());
        Self::prune(&mut inner, now, self.config.window);

        if inner.state == CircuitState::Active && inner.errors.len() > self.config.threshold {
            inner.state = CircuitState::Inactive;
            inner.deactivated_at = Some(now);
            warn!(
                agent = %self.name,
                errors = inner.errors.len(),
                window_secs = self.config.window.as_secs(),
                "Agent deactivated after repeated errors"
            );
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        self.maybe_reactivate(&mut inner);
        let now = Instant::now();
        Self::prune(&mut inner, now, self.config.window);

        let time_until_reactivation = match (inner.state, inner.deactivated_at) {
            (CircuitState::Inactive, Some(at)) => {
                Some(self.config.cooldown.saturating_sub(now.duration_since(at)))
            }
            _ => None,
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            recent_errors: inner.errors.len(),
            total_errors: inner.total_errors,
            last_error: inner.last_error_message.clone(),
            time_until_reactivation,
        }
    }

    /// Force the agent back to active with an empty window
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Active;
        inner.errors.clear();
        inner.deactivated_at = None;
    }

    fn maybe_reactivate(&self, inner: &mut CircuitBreakerInner) {
        if inner.state != CircuitState::Inactive {
            return;
        }
        if let Some(at) = inner.deactivated_at {
            if at.elapsed() >= self.config.cooldown {
                inner.state = CircuitState::Active;
                inner.errors.clear();
                inner.deactivated_at = None;
                info!(agent = %self.name, "Agent reactivated after cooldown");
            }
        }
    }

    fn prune(inner: &mut CircuitBreakerInner, now: Instant, window: Duration) {
        while let Some(oldest) = inner.errors.front() {
            if now.duration_since(*oldest) > window {
                inner.errors.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
