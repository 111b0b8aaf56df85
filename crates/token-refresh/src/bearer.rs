//! Bearer interceptor: token attachment plus coordinated refresh on 419

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use interceptor::{Interceptor, PassthroughInterceptor, RequestError, RetryDecision};

use crate::adapter::RequestAdapter;
use crate::coordinator::TokenCoordinator;

/// Plugs the coordinator into an `interceptor::Pipeline`.
///
/// Static header rules are applied first so they can never overwrite the
/// bearer token.
pub struct TokenInterceptor {
    adapter: RequestAdapter,
    coordinator: Arc<TokenCoordinator>,
    headers: PassthroughInterceptor,
}

impl TokenInterceptor {
    /// Attaches tokens from the coordinator's own store.
    pub fn new(coordinator: Arc<TokenCoordinator>, headers: PassthroughInterceptor) -> Self {
        let adapter = RequestAdapter::new(Arc::clone(coordinator.credential_store()));
        Self {
            adapter,
            coordinator,
            headers,
        }
    }

    pub fn coordinator(&self) -> &Arc<TokenCoordinator> {
        &self.coordinator
    }
}

impl Interceptor for TokenInterceptor {
    fn id(&self) -> &str {
        "bearer"
    }

    fn adapt<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = interceptor::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.headers.inject_headers(request);
            self.adapter.attach_token(request).await;
            Ok(())
        })
    }

    fn retry(
        &self,
        status: u16,
        error: RequestError,
    ) -> Pin<Box<dyn Future<Output = RetryDecision> + Send + '_>> {
        Box::pin(async move { self.coordinator.retry(status, error).await })
    }
}
