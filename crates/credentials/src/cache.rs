//! Write-through read cache over a credential store
//!
//! Backing stores such as an OS keychain can be slow to read. The request
//! adapter reads the access token on every outgoing request, so it goes
//! through this cache. Every write made through the cache updates it, which
//! keeps it coherent as long as all writers share the same cached instance.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::trace;

use crate::store::{CredentialStore, StoreFuture};

/// Caching wrapper. Absent keys are cached too (`None` entries).
///
/// Read misses go to the inner store without holding the lock, so a slow
/// backing read never stalls hits. Writes hold the lock across the inner
/// call and bump a generation counter; a miss only fills the cache if no
/// write landed while it was reading.
pub struct CachedCredentialStore<S> {
    inner: S,
    cache: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Option<String>>,
    generation: u64,
}

impl CacheState {
    fn record(&mut self, key: &str, value: Option<String>) {
        self.generation += 1;
        self.entries.insert(key.to_string(), value);
    }
}

impl<S: CredentialStore> CachedCredentialStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(CacheState::default()),
        }
    }

    /// Drop all cached entries; the next read of each key hits the inner store.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        cache.generation += 1;
        cache.entries.clear();
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: CredentialStore> CredentialStore for CachedCredentialStore<S> {
    fn contains<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.read(key).await?.is_some()) })
    }

    fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let generation = {
                let cache = self.cache.lock().await;
                if let Some(hit) = cache.entries.get(key) {
                    trace!(key, "credential cache hit");
                    return Ok(hit.clone());
                }
                cache.generation
            };

            let value = self.inner.read(key).await?;

            let mut cache = self.cache.lock().await;
            if cache.generation == generation {
                cache.entries.insert(key.to_string(), value.clone());
            } else {
                trace!(key, "credential written during miss, not caching");
            }
            Ok(value)
        })
    }

    fn save<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut cache = self.cache.lock().await;
            self.inner.save(key, value.clone()).await?;
            cache.record(key, Some(value));
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut cache = self.cache.lock().await;
            self.inner.delete(key).await?;
            cache.record(key, None);
            Ok(())
        })
    }

    fn delete_all(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut cache = self.cache.lock().await;
            self.inner.delete_all().await?;
            cache.generation += 1;
            cache.entries.clear();
            Ok(())
        })
    }
}
