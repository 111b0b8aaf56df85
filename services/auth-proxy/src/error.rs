//! Service-specific error types

use axum::http::StatusCode;
use interceptor::RequestError;
use thiserror::Error;

/// Per-request failures the proxy answers itself instead of relaying an
/// upstream response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("session expired, login required")]
    SessionExpired,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// HTTP status returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::SessionExpired => StatusCode::UNAUTHORIZED,
            Error::RefreshFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// `error.type` in the JSON body and `error_type` metric label.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::SessionExpired => "session_expired",
            Error::RefreshFailed(_) => "refresh_failed",
            Error::UpstreamTimeout(_) => "timeout",
            Error::UpstreamError(_) => "upstream",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::RefreshTokenExpired => Error::SessionExpired,
            RequestError::RefreshFailed(msg) => Error::RefreshFailed(msg),
            RequestError::Timeout(msg) => Error::UpstreamTimeout(msg),
            RequestError::Transport(msg) => Error::UpstreamError(msg),
            RequestError::InvalidRequest(msg) => Error::InvalidRequest(msg),
            status @ RequestError::Status { .. } => Error::UpstreamError(status.to_string()),
        }
    }
}
