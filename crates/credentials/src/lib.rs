//! Credential storage for bearer session tokens
//!
//! Defines the `CredentialStore` contract consumed by the refresh coordinator
//! and three implementations:
//! - `FileCredentialStore`: JSON file on disk, atomic writes, 0600 permissions
//! - `MemoryCredentialStore`: volatile map for tests and ephemeral sessions
//! - `CachedCredentialStore`: write-through read cache over any other store
//!
//! Only two keys are used by the session layer: `accessToken` and
//! `refreshToken`. Values are opaque strings.

pub mod cache;
pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use cache::CachedCredentialStore;
pub use error::{Error, Result};
pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use store::{
    ACCESS_TOKEN_KEY, CredentialStore, REFRESH_TOKEN_KEY, StoreFuture, delete_tokens, save_tokens,
};
