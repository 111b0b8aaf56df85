//! File-backed credential store
//!
//! Keeps a JSON object of key → token string on disk. All writes use atomic
//! temp-file + rename so a crash mid-write never leaves a truncated file. A
//! tokio Mutex serializes writes coming from the refresh path and from
//! explicit login/logout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{CredentialStore, StoreFuture};

/// Thread-safe credential file manager.
///
/// Reads are served from the in-memory map; only mutations touch the disk.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileCredentialStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` so a fresh install
    /// starts logged out.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let values: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), keys = values.len(), "loaded credentials");
            values
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let values = HashMap::new();
            write_atomic(&path, &values).await?;
            values
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn contains<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.state.lock().await.contains_key(key)) })
    }

    fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.state.lock().await.get(key).cloned()) })
    }

    fn save<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.insert(key.to_string(), value);
            debug!(key, "saved credential");
            write_atomic(&self.path, &state).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.remove(key).is_some() {
                debug!(key, "deleted credential");
                write_atomic(&self.path, &state).await?;
            }
            Ok(())
        })
    }

    fn delete_all(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.clear();
            debug!("cleared all credentials");
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write the map to `path` atomically with 0600 permissions.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
