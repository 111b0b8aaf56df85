//! Bearer token attachment

use std::sync::Arc;

use credentials::{ACCESS_TOKEN_KEY, CredentialStore};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::{debug, warn};

/// Attaches the stored access token to outgoing requests.
///
/// Reads through the shared store on every request, so a token written by a
/// refresh is picked up by the very next retry. Wrap the store in
/// `CachedCredentialStore` to keep this off the disk.
pub struct RequestAdapter {
    store: Arc<dyn CredentialStore>,
}

impl RequestAdapter {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Set `Authorization: Bearer <token>` when a token is stored.
    ///
    /// Returns whether the header was attached. With no token, or a token
    /// that cannot be read, the request goes out unmodified and the server
    /// decides.
    pub async fn attach_token(&self, request: &mut reqwest::Request) -> bool {
        let token = match self.store.read(ACCESS_TOKEN_KEY).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(url = %request.url(), "no access token stored, sending unauthenticated");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "failed to read access token");
                return false;
            }
        };

        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
                true
            }
            Err(e) => {
                warn!(error = %e, "stored access token is not a valid header value");
                false
            }
        }
    }
}
