//! Shared HTTP client for provider adapters
//!
//! Throttling lives in the agent wrapper; this client only handles transport
//! concerns: headers, server-hinted retries for 429/5xx, status mapping and
//! JSON decoding.

use super::retry_policy::{is_retryable_error, is_retryable_status, RateLimitInfo, RetryPolicy};
use crate::shared::errors::{AppError, AppResult};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

const USER_AGENT: &str = concat!("kumo/", env!("CARGO_PKG_VERSION"));

pub struct AgentHttpClient {
    client: Client,
    retry_policy: RetryPolicy,
    provider_name: String,
    bearer: Option<String>,
}

impl AgentHttpClient {
    pub fn new(provider_name: &str, retry_policy: RetryPolicy) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry_policy,
            provider_name: provider_name.to_string(),
            bearer: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn has_bearer(&self) -> bool {
        self.bearer.is_some()
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub async fn get_json(&self, url: &str, query: &[(String, String)]) -> AppResult<Value> {
        self.request_with_retries(Method::GET, url, query, None).await
    }

    pub async fn post_json(&self, url: &str, body: &Value) -> AppResult<Value> {
        self.request_with_retries(Method::POST, url, &[], Some(body))
            .await
    }

    async fn request_with_retries(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> AppResult<Value> {
        let attempts = self.retry_policy.max_retries + 1;

        for attempt in 0..attempts {
            let last_attempt = attempt + 1 == attempts;

            match self.send(&method, url, query, body).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return self.parse_response(response).await;
                    }

                    if is_retryable_status(status.as_u16()) && !last_attempt {
                        let hint = RateLimitInfo::from_headers(response.headers());
                        let delay = self
                            .retry_policy
                            .calculate_delay(attempt, hint.recommended_delay());
                        log::warn!(
                            "{} returned {} (attempt {}/{}). Retrying in {:?}",
                            self.provider_name,
                            status,
                            attempt + 1,
                            attempts,
                            delay
                        );
                        sleep(delay).await;
                        continue;
                    }

                    return Err(self.status_error(status));
                }
                Err(e) => {
                    if is_retryable_error(&e) && !last_attempt {
                        let delay = self.retry_policy.calculate_delay(attempt, None);
                        log::warn!(
                            "{} request failed (attempt {}/{}): {}. Retrying in {:?}",
                            self.provider_name,
                            attempt + 1,
                            attempts,
                            e,
                            delay
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return Err(AppError::from(e));
                }
            }
        }

        Err(AppError::ExternalServiceError(format!(
            "{} request failed after {} attempts",
            self.provider_name, attempts
        )))
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Response, reqwest::Error> {
        let mut request_builder = self
            .client
            .request(method.clone(), url)
            .header("Accept", "application/json");

        if let Some(token) = &self.bearer {
            request_builder = request_builder.bearer_auth(token);
        }
        if !query.is_empty() {
            request_builder = request_builder.query(query);
        }
        if let Some(json_body) = body {
            request_builder = request_builder.json(json_body);
        }

        request_builder.send().await
    }

    fn status_error(&self, status: StatusCode) -> AppError {
        match status.as_u16() {
            404 => AppError::NotFound(format!("{} has no such resource", self.provider_name)),
            429 => AppError::RateLimitError(format!(
                "{} rate limit exceeded after {} attempts",
                self.provider_name,
                self.retry_policy.max_retries + 1
            )),
            _ => AppError::ApiError(format!("{} returned {}", self.provider_name, status)),
        }
    }

    async fn parse_response(&self, response: Response) -> AppResult<Value> {
        let response_text = response.text().await.map_err(|e| {
            AppError::SerializationError(format!(
                "Failed to read {} response: {}",
                self.provider_name, e
            ))
        })?;

        serde_json::from_str(&response_text).map_err(|e| {
            let preview: String = response_text.chars().take(200).collect();
            AppError::SerializationError(format!(
                "Failed to parse {} response: {}. Response: {}",
                self.provider_name, e, preview
            ))
        })
    }
}
