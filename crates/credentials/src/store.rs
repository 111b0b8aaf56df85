//! The `CredentialStore` contract
//!
//! Stores must be safe for concurrent reads and writes on their own: the
//! refresh coordinator only guarantees a single in-flight refresh write, it
//! does not serialize store access for readers.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::error::Result;

/// Key holding the bearer access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Key holding the refresh token used for reissue.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable key/value storage for session tokens.
///
/// Uses `Pin<Box<dyn Future>>` return types so the store can be shared as
/// `Arc<dyn CredentialStore>`.
pub trait CredentialStore: Send + Sync {
    /// Whether a value exists for `key`.
    fn contains<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Read the value for `key`, or `None` if absent.
    fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Insert or overwrite the value for `key`.
    fn save<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    /// Remove every stored value.
    fn delete_all(&self) -> StoreFuture<'_, ()>;
}

/// Persist a freshly issued token pair.
///
/// The refresh token is written first: if the second write fails the
/// session still holds a usable refresh token for the next attempt.
pub async fn save_tokens(
    store: &dyn CredentialStore,
    access_token: String,
    refresh_token: String,
) -> Result<()> {
    store.save(REFRESH_TOKEN_KEY, refresh_token).await?;
    store.save(ACCESS_TOKEN_KEY, access_token).await?;
    debug!("saved token pair");
    Ok(())
}

/// Remove both session tokens.
pub async fn delete_tokens(store: &dyn CredentialStore) -> Result<()> {
    store.delete(ACCESS_TOKEN_KEY).await?;
    store.delete(REFRESH_TOKEN_KEY).await?;
    debug!("deleted token pair");
    Ok(())
}
