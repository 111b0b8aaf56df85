//! Reactive bearer token refresh
//!
//! When an access token expires mid-flight, many concurrent requests fail
//! with the same signal. This crate makes sure they trigger exactly one
//! reissue call, park until it resolves, and then retry or fail together.
//!
//! Request lifecycle:
//! 1. `RequestAdapter` attaches the stored access token to each request
//! 2. Upstream answers 419 → `classifier` says `TriggerRefresh`
//! 3. `TokenCoordinator::handle_retry` queues the caller; the first caller
//!    to pass the single-flight gate runs the reissue and stores the new
//!    pair only if its cycle is still live
//! 4. The queue is drained and every waiter gets the same decision
//! 5. 401/403/418, or a rejected refresh token, moves the session to
//!    `Expired`: tokens are wiped and `ExpiryNotifier` fires once
//!
//! No expiry timestamps are tracked and nothing refreshes proactively.

pub mod adapter;
pub mod bearer;
pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod notifier;
mod telemetry;

pub use adapter::RequestAdapter;
pub use bearer::TokenInterceptor;
pub use classifier::{RetryAction, classify, is_refresh_rejection};
pub use coordinator::{RetryCallback, StateSnapshot, TokenCoordinator};
pub use error::{Error, Result};
pub use executor::{RefreshExecutor, RefreshOutcome, TokenResponse};
pub use notifier::{BroadcastNotifier, ExpiryEvent, ExpiryNotifier};
