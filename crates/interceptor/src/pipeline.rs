//! Request pipeline: send, intercept, retry
//!
//! Each attempt clones the original request, lets the interceptor adapt the
//! clone (fresh credentials on every attempt), and sends it. Non-success
//! statuses are handed to the interceptor, whose decision drives the loop,
//! until the retry budget is spent; the final failed attempt is returned
//! as-is.
//! Transport errors are not retried here: they carry no status for the
//! interceptor to classify.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{Interceptor, PassthroughInterceptor, RequestError, Result, RetryDecision};

/// Retries allowed per request after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// HTTP client bound to an interceptor.
#[derive(Clone)]
pub struct Pipeline {
    client: reqwest::Client,
    interceptor: Arc<dyn Interceptor>,
    max_retries: u32,
}

impl Pipeline {
    pub fn new(client: reqwest::Client, interceptor: Arc<dyn Interceptor>) -> Self {
        Self {
            client,
            interceptor,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// A pipeline that never attaches credentials and never retries.
    pub fn passthrough(client: reqwest::Client) -> Self {
        Self::new(client, Arc::new(PassthroughInterceptor::default()))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Underlying client, for building requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn interceptor_id(&self) -> &str {
        self.interceptor.id()
    }

    /// Build and send a request.
    pub async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = builder
            .build()
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
        self.send(request).await
    }

    /// Send a request, consulting the interceptor on every failed status.
    ///
    /// Returns the first successful response. The body must be replayable
    /// (not a stream) so the request can be cloned per attempt.
    pub async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let mut attempt = 0u32;

        loop {
            let mut outgoing = request.try_clone().ok_or_else(|| {
                RequestError::InvalidRequest("request body cannot be replayed".into())
            })?;
            self.interceptor.adapt(&mut outgoing).await?;

            let response = self.client.execute(outgoing).await.map_err(|e| {
                if e.is_timeout() {
                    RequestError::Timeout(e.to_string())
                } else {
                    RequestError::Transport(e.to_string())
                }
            })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            let error = RequestError::Status {
                status: status.as_u16(),
                content_type,
                body,
            };

            // Budget spent: the interceptor is not consulted.
            if attempt >= self.max_retries {
                warn!(
                    status = status.as_u16(),
                    attempts = attempt + 1,
                    interceptor = self.interceptor.id(),
                    "retry limit reached"
                );
                return Err(error);
            }

            match self.interceptor.retry(status.as_u16(), error).await {
                RetryDecision::FailWith(e) => return Err(e),
                RetryDecision::Retry => {
                    debug!(status = status.as_u16(), attempt, "retrying request");
                }
                RetryDecision::RetryAfterDelay(delay) => {
                    debug!(
                        status = status.as_u16(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }
}
