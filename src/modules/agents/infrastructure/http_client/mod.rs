pub mod client;
pub mod retry_policy;

pub use client::AgentHttpClient;
pub use retry_policy::{RateLimitInfo, RetryPolicy};
