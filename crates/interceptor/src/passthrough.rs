//! Passthrough interceptor: static header injection, no retries.
//!
//! The token reissue call is sent through a pipeline built on this
//! interceptor so a failing reissue can never re-enter the refresh
//! coordinator.

use crate::{Interceptor, RequestError, RetryDecision};
use reqwest::header::{HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use tracing::warn;

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Static header injection, never attaches credentials, never retries.
///
/// Refuses to touch `Authorization`: that header belongs to the bearer
/// interceptor.
#[derive(Debug, Default)]
pub struct PassthroughInterceptor {
    headers: Vec<HeaderInjection>,
}

impl PassthroughInterceptor {
    pub fn new(headers: Vec<HeaderInjection>) -> Self {
        Self { headers }
    }

    /// Apply the configured header rules to `request`.
    pub fn inject_headers(&self, request: &mut reqwest::Request) {
        for injection in &self.headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == reqwest::header::AUTHORIZATION {
                warn!(header = %injection.name, "refusing to inject authorization header");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            request.headers_mut().insert(name, value);
        }
    }
}

impl Interceptor for PassthroughInterceptor {
    fn id(&self) -> &str {
        "passthrough"
    }

    fn adapt<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send + 'a>> {
        self.inject_headers(request);
        Box::pin(async { Ok(()) })
    }

    fn retry(
        &self,
        _status: u16,
        error: RequestError,
    ) -> Pin<Box<dyn Future<Output = RetryDecision> + Send + '_>> {
        Box::pin(async move { RetryDecision::FailWith(error) })
    }
}
