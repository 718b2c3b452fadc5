//! Shared HTTP plumbing for the external clients.
//!
//! One pooled `reqwest::Client` per API client, 5 s connect + 10 s read
//! timeouts, exponential backoff on 5xx, no retry on 4xx, and `Retry-After`
//! handling on 429 bounded by the retry budget.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a 429 `Retry-After` is honored before the call is given up.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http status {status}")]
    Status { status: u16 },
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Retry policy for one logical API call.
#[derive(Debug, Clone, Copy)]
pub struct HttpPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl HttpPolicy {
    /// Default: 3 attempts with 0.3 s / 0.6 s / 1.2 s backoff.
    pub fn standard() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(300),
        }
    }

    /// Used whenever the caller imposes an overall per-call budget: a single
    /// retry so a flaky host cannot eat the whole budget.
    pub fn timeout_safe() -> Self {
        Self {
            attempts: 2,
            initial_backoff: Duration::from_millis(300),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt)
    }
}

/// Build the pooled session shared by one client.
pub fn build_session(default_headers: HeaderMap) -> Result<reqwest::Client, ClientError> {
    let client = reqwest::Client::builder()
        .default_headers(default_headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .build()?;
    Ok(client)
}

/// GET `url` and decode the JSON body, retrying per `policy`.
///
/// Retries on 5xx (including the metadata APIs' 503 overload responses) and
/// on transport errors. 4xx never retries. 429 sleeps out the `Retry-After`
/// when it fits the budget, otherwise gives up with
/// [`ClientError::RateLimited`].
pub async fn get_json<T: serde::de::DeserializeOwned>(
    session: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    policy: HttpPolicy,
) -> Result<T, ClientError> {
    let mut last_error = None;
    for attempt in 0..policy.attempts {
        if attempt > 0 {
            let backoff = policy.backoff(attempt - 1);
            debug!("Retrying {} after {:?} (attempt {})", url, backoff, attempt + 1);
            tokio::time::sleep(backoff).await;
        }

        let mut request = session.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                last_error = Some(ClientError::Transport(e));
                continue;
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            if Duration::from_secs(retry_after) <= MAX_RETRY_AFTER && attempt + 1 < policy.attempts
            {
                warn!("429 from {}, honoring Retry-After {}s", url, retry_after);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }
            return Err(ClientError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status.is_server_error() {
            last_error = Some(ClientError::Status {
                status: status.as_u16(),
            });
            continue;
        }

        if !status.is_success() {
            // 4xx: not retryable
            return Err(ClientError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        return serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()));
    }

    Err(last_error.unwrap_or(ClientError::Parse("no attempts made".to_string())))
}
