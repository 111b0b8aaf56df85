//! Request interception for outgoing HTTP calls
//!
//! Defines the `Interceptor` trait that decouples the request pipeline from
//! authentication strategy. The pipeline asks the interceptor to adapt each
//! outgoing request and, when a request fails with an HTTP status, asks it
//! what to do next. `PassthroughInterceptor` never retries; it is the
//! non-intercepting pipeline used for the token reissue call itself.

pub mod passthrough;
pub mod pipeline;

pub use passthrough::{HeaderInjection, PassthroughInterceptor};
pub use pipeline::{DEFAULT_MAX_RETRIES, Pipeline};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Errors surfaced to callers of the pipeline.
///
/// `Clone` because a single refresh failure is delivered to every waiter
/// queued behind it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Upstream answered with a non-success status.
    #[error("upstream returned {status}: {body}")]
    Status {
        status: u16,
        content_type: Option<String>,
        body: String,
    },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The refresh token is invalid; the session must log in again.
    #[error("refresh token expired, login required")]
    RefreshTokenExpired,

    /// The reissue call failed transiently; a later request may retry it.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RequestError {
    /// Shorthand for a status error without a content type.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        RequestError::Status {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RequestError>;

/// What the pipeline should do with a failed request.
///
/// `RetryAfterDelay` is honoured by the pipeline for interceptors that want
/// backoff; the token refresh interceptor only produces `Retry` and `FailWith`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    RetryAfterDelay(Duration),
    FailWith(RequestError),
}

/// Abstraction over request authentication and retry strategy.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Interceptor>`).
pub trait Interceptor: Send + Sync {
    /// Identifier for logging (e.g. "passthrough", "bearer").
    fn id(&self) -> &str;

    /// Modify an outgoing request before it is sent (headers only).
    fn adapt<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Decide what happens to a request that failed with `status`.
    fn retry(
        &self,
        status: u16,
        error: RequestError,
    ) -> Pin<Box<dyn Future<Output = RetryDecision> + Send + '_>>;
}
