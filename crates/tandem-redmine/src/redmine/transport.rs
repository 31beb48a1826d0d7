use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tandem_core::{AdapterError, AdapterResult};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::redmine::config::RedmineConfig;

const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 8_000;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestMethod {
    Get,
    Post,
    Put,
}

#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: RestMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl RestRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: RestMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: RestMethod::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: RestMethod::Put,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub body: String,
}

/// Transport seam under the Redmine adapter. The reqwest implementation owns
/// retry/backoff and error classification; tests substitute canned responses.
#[async_trait]
pub trait RedmineTransport: Send + Sync {
    async fn execute(
        &self,
        request: RestRequest,
        cancel: &CancellationToken,
    ) -> AdapterResult<RestResponse>;
}

#[derive(Clone)]
pub struct ReqwestRedmineTransport {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl fmt::Debug for ReqwestRedmineTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReqwestRedmineTransport")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ReqwestRedmineTransport {
    pub fn new(config: &RedmineConfig) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("tandem/redmine")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| {
                AdapterError::Transient(format!("failed to initialize Redmine HTTP client: {err}"))
            })?;

        Ok(Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    async fn attempt(&self, request: &RestRequest) -> Result<(u16, String), reqwest::Error> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            RestMethod::Get => self.client.get(&url),
            RestMethod::Post => self.client.post(&url),
            RestMethod::Put => self.client.put(&url),
        };
        builder = builder.header("X-Redmine-API-Key", &self.api_key);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

fn retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1_u64 << attempt.min(6));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}

fn truncate_for_error(body: &str) -> String {
    const MAX_LEN: usize = 300;
    if body.chars().count() <= MAX_LEN {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}

#[async_trait]
impl RedmineTransport for ReqwestRedmineTransport {
    async fn execute(
        &self,
        request: RestRequest,
        cancel: &CancellationToken,
    ) -> AdapterResult<RestResponse> {
        let mut last_failure = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                outcome = self.attempt(&request) => outcome,
            };

            match outcome {
                Ok((status, body)) if (200..300).contains(&status) => {
                    return Ok(RestResponse { status, body });
                }
                Ok((404, _)) => return Err(AdapterError::NotFound),
                Ok((status, body)) if retryable_status(status) => {
                    last_failure = format!("HTTP {status}: {}", truncate_for_error(&body));
                    warn!(
                        status,
                        attempt = attempt + 1,
                        path = %request.path,
                        "Redmine request hit a retryable failure"
                    );
                }
                Ok((status, body)) => {
                    return Err(AdapterError::permanent(status, truncate_for_error(&body)));
                }
                Err(err) => {
                    last_failure = err.to_string();
                    warn!(
                        attempt = attempt + 1,
                        path = %request.path,
                        error = %err,
                        "Redmine request failed"
                    );
                }
            }
        }

        Err(AdapterError::Transient(format!(
            "Redmine request to {} failed after {MAX_ATTEMPTS} attempts: {last_failure}",
            request.path
        )))
    }
}
