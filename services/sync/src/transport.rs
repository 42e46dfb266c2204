use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use storesync_common::error::SyncError;

/// Retry policy for outbound requests: exponential backoff starting at
/// `base_delay`, doubling per failed attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay inserted after failed attempt `i` (zero-based): `2^i * base`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// How a response status should be handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    Terminal,
    Retry,
}

/// Classify a response status. 400 and 404 mean the request itself will
/// never succeed. On the write path a 500 is terminal too; only reads
/// are retried through server errors. Everything else, 429 and the rest
/// of the 5xx family included, is transient.
pub fn classify_status(status: StatusCode, is_write: bool) -> Disposition {
    if status.is_success() {
        return Disposition::Success;
    }
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => Disposition::Terminal,
        StatusCode::INTERNAL_SERVER_ERROR if is_write => Disposition::Terminal,
        _ => Disposition::Retry,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        SyncError::Transport(e.to_string())
    }
}

/// Execute the request produced by `make` until it succeeds, a terminal
/// status is seen, or the policy's attempts are exhausted. Connect and
/// timeout errors count as transient; other client-side errors do not.
pub async fn send_json_with_retry<T, F>(
    policy: &RetryPolicy,
    endpoint: &str,
    is_write: bool,
    make: F,
) -> Result<T, TransportError>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    let mut last_error = String::new();

    for attempt in 0..policy.max_retries {
        let response = match make().send().await {
            Ok(response) => response,
            Err(e) => {
                if !(e.is_timeout() || e.is_connect()) {
                    return Err(TransportError::Request(e));
                }
                last_error = e.to_string();
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    endpoint,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %last_error,
                    "network error, retrying"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        let status = response.status();
        match classify_status(status, is_write) {
            Disposition::Success => {
                return response.json::<T>().await.map_err(TransportError::Request)
            }
            Disposition::Terminal => {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Http { status, body });
            }
            Disposition::Retry => {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    endpoint,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    status = status.as_u16(),
                    "transient failure, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }

    Err(TransportError::MaxRetriesExceeded {
        attempts: policy.max_retries,
        last_error,
    })
}
