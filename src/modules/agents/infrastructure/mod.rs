// Provider plumbing: adapters plus the wrappers every call goes through
pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod http_client;
pub mod managed_agent;
pub mod rate_limiter;

pub use cache::{CacheStats, ResponseCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use http_client::{AgentHttpClient, RetryPolicy};
pub use managed_agent::ManagedAgent;
pub use rate_limiter::AgentRateLimiter;
