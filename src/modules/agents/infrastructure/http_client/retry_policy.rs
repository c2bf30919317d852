//! Retry policies for provider HTTP calls
//!
//! Only throttling (429) and server errors are retried at this layer. Anything
//! else goes straight back to the agent wrapper, which counts it toward the
//! circuit breaker.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base delay between retries (overridden by server hints)
    pub base_delay: Duration,
    /// Upper bound on any single wait
    pub max_delay: Duration,
    pub exponential_backoff: bool,
    pub backoff_multiplier: f64,
    /// Random extra wait, as a fraction of the computed delay
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_backoff: true,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// MangaDex allows ~5 req/s globally and answers 429 with Retry-After
    pub fn mangadex() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// AniList degrades to 30 req/min under load
    pub fn anilist() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(700),
            max_delay: Duration::from_secs(60),
            exponential_backoff: true,
            backoff_multiplier: 1.5,
            jitter_factor: 0.1,
        }
    }

    /// No retries at all (used by tests and push endpoints)
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the next attempt
    pub fn calculate_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(server_delay) = retry_after {
            return server_delay.min(self.max_delay);
        }

        let delay = if self.exponential_backoff {
            let multiplier = self.backoff_multiplier.powi(attempt as i32);
            Duration::from_millis((self.base_delay.as_millis() as f64 * multiplier) as u64)
        } else {
            self.base_delay
        };
        let jitter = (delay.as_millis() as f64 * self.jitter_factor * rand::random::<f64>()) as u64;

        (delay + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Throttling hints extracted from response headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    pub retry_after: Option<Duration>,
    /// Time until the window resets (from X-RateLimit-Reset / X-RateLimit-Retry-After)
    pub reset_time: Option<Duration>,
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let header_u64 = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
        };

        let retry_after = header_u64("retry-after").map(Duration::from_secs);

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let reset_time = header_u64("x-ratelimit-reset")
            .or_else(|| header_u64("x-ratelimit-retry-after"))
            .map(|timestamp| Duration::from_secs(timestamp.saturating_sub(now)));

        Self {
            retry_after,
            reset_time,
            remaining: header_u64("x-ratelimit-remaining").map(|v| v as u32),
            limit: header_u64("x-ratelimit-limit").map(|v| v as u32),
        }
    }

    /// Retry-After wins over the reset time
    pub fn recommended_delay(&self) -> Option<Duration> {
        self.retry_after.or(self.reset_time)
    }
}

/// Whether an HTTP status is worth retrying inside the client
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500..=599)
}

/// Whether a transport error is worth retrying inside the client
pub fn is_retryable_error(error: &reqwest::Error) -> bool {
    match error.status() {
        Some(status) => is_retryable_status(status.as_u16()),
        None => error.is_timeout() || error.is_connect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_delay_with_retry_after() {
        let policy = RetryPolicy::mangadex();
        let delay = policy.calculate_delay(1, Some(Duration::from_secs(30)));
        assert_eq!(delay, Duration::from_secs(30));

        let capped = policy.calculate_delay(1, Some(Duration::from_secs(600)));
        assert_eq!(capped, policy.max_delay);
    }

    #[test]
    fn test_calculate_delay_exponential_backoff() {
        let policy = RetryPolicy::anilist();
        let delay1 = policy.calculate_delay(1, None);
        let delay2 = policy.calculate_delay(2, None);
        assert!(delay2 > delay1);
        let first = policy.calculate_delay(0, None);
        assert!(first >= Duration::from_millis(700) && first <= Duration::from_millis(770));
    }

    #[test]
    fn test_rate_limit_info_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "30".parse().unwrap());
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-limit", "90".parse().unwrap());

        let info = RateLimitInfo::from_headers(&headers);
        assert_eq!(info.retry_after, Some(Duration::from_secs(30)));
        assert_eq!(info.remaining, Some(0));
        assert_eq!(info.limit, Some(90));
        assert_eq!(info.recommended_delay(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(400));
    }
}
