use log::{debug, error, info, warn};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the logging system
/// This should be called once at application startup
pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info) // Default level
            .filter_module("kumo", log::LevelFilter::Debug) // More verbose for our crate
            .filter_module("kumo_lib", log::LevelFilter::Debug)
            .filter_module("reqwest", log::LevelFilter::Warn) // Reduce HTTP noise
            .filter_module("hyper", log::LevelFilter::Warn)
            .filter_module("tokio", log::LevelFilter::Warn) // Reduce tokio noise
            .format_timestamp_secs()
            .format_target(false)
            .format_module_path(false)
            .init();

        info!("Logging system initialized");
    });
}

/// Macro for structured logging with context
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!($($arg)*)
    };
}

/// Structured logging helpers for common patterns
pub struct LogContext;

impl LogContext {
    /// Log agent calls
    pub fn agent_call(agent: &str, operation: &str, outcome: &str, duration_ms: Option<u64>) {
        match duration_ms {
            Some(duration) => debug!(
                "AGENT: {} {} {} in {}ms",
                agent, operation, outcome, duration
            ),
            None => debug!("AGENT: Starting {} {}", agent, operation),
        }
    }

    /// Log job lifecycle transitions
    pub fn job_transition(job_id: &str, queue: &str, from: &str, to: &str) {
        debug!("JOB: {} on '{}' {} -> {}", job_id, queue, from, to);
    }

    /// Log fan-out summaries
    pub fn fan_out(operation: &str, fulfilled: usize, failed: usize, skipped: usize) {
        if failed > 0 {
            warn!(
                "FANOUT: {} finished with {} fulfilled, {} failed, {} skipped",
                operation, fulfilled, failed, skipped
            );
        } else {
            info!(
                "FANOUT: {} finished with {} fulfilled, {} skipped",
                operation, fulfilled, skipped
            );
        }
    }

    /// Log search operations
    pub fn search_operation(query: &str, agent: Option<&str>, results: Option<usize>) {
        match (agent, results) {
            (Some(a), Some(r)) => info!("Search: '{}' via {} returned {} results", query, a, r),
            (Some(a), None) => debug!("Search: Starting '{}' via {}", query, a),
            (None, Some(r)) => info!("Search: '{}' returned {} results", query, r),
            (None, None) => debug!("Search: Starting '{}'", query),
        }
    }

    /// Log errors with context
    pub fn error_with_context(error: &dyn std::error::Error, context: &str) {
        error!("{}: {}", context, error);
    }

    /// Log performance metrics
    pub fn performance_metric(operation: &str, duration_ms: u64, additional_info: Option<&str>) {
        match additional_info {
            Some(info) => info!(
                "Performance: {} took {}ms ({})",
                operation, duration_ms, info
            ),
            None => info!("Performance: {} took {}ms", operation, duration_ms),
        }
    }
}

/// Helper for timing operations
pub struct TimedOperation {
    start: std::time::Instant,
    operation: String,
}

impl TimedOperation {
    pub fn new(operation: &str) -> Self {
        debug!("Starting: {}", operation);
        Self {
            start: std::time::Instant::now(),
            operation: operation.to_string(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish(self) -> u64 {
        let duration = self.elapsed_ms();
        LogContext::performance_metric(&self.operation, duration, None);
        duration
    }

    pub fn finish_with_info(self, info: &str) -> u64 {
        let duration = self.elapsed_ms();
        LogContext::performance_metric(&self.operation, duration, Some(info));
        duration
    }
}
