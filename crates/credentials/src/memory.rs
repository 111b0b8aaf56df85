//! In-memory credential store

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::store::{CredentialStore, StoreFuture};

/// Volatile credential store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with a session token pair.
    pub fn with_tokens(access_token: &str, refresh_token: &str) -> Self {
        let values = HashMap::from([
            (crate::ACCESS_TOKEN_KEY.to_string(), access_token.to_string()),
            (
                crate::REFRESH_TOKEN_KEY.to_string(),
                refresh_token.to_string(),
            ),
        ]);
        Self {
            values: RwLock::new(values),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn contains<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.values.read().await.contains_key(key)) })
    }

    fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.values.read().await.get(key).cloned()) })
    }

    fn save<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.values.write().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.values.write().await.remove(key);
            Ok(())
        })
    }

    fn delete_all(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.values.write().await.clear();
            Ok(())
        })
    }
}
