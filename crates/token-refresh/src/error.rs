//! Error types for token refresh

use std::time::Duration;

use interceptor::RequestError;

/// Reasons a reissue attempt failed without proving the refresh token invalid.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh request failed: {0}")]
    Http(String),

    #[error("refresh endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("refresh timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("credential store error: {0}")]
    Credential(String),
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<credentials::Error> for Error {
    fn from(e: credentials::Error) -> Self {
        Error::Credential(e.to_string())
    }
}

impl From<Error> for RequestError {
    fn from(e: Error) -> Self {
        RequestError::RefreshFailed(e.to_string())
    }
}
