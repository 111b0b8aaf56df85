//! Token state coordinator and single-flight refresh
//!
//! Owns the session's refresh/expiry flags and the queue of callers parked
//! behind an in-flight refresh. All state lives behind one mutex. The lock is
//! never held across network I/O; the one storage write made under it is the
//! commit of a reissued pair, so an expiry transition cannot land between
//! the liveness check and the write. Queued callbacks are always invoked
//! after the lock is released (a callback typically sends a new request that
//! may come straight back here).
//!
//! Every outcome of a refresh cycle is applied only if that cycle is still
//! the live one. A cycle cancelled by expiry or logout neither stores tokens
//! nor expires a later session.
//!
//! States:
//! - Idle → Refreshing (first 419 caller wins the gate)
//! - Refreshing → Idle (reissue succeeded, or failed transiently)
//! - Idle | Refreshing → Expired (terminal status, or refresh token rejected)
//! - Expired is sticky until `reset` (fresh login) or `set_expired(false)`

use std::collections::VecDeque;
use std::sync::Arc;

use credentials::CredentialStore;
use interceptor::{RequestError, RetryDecision};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};

use crate::classifier::{RetryAction, classify};
use crate::executor::{RefreshExecutor, RefreshOutcome};
use crate::notifier::{ExpiryEvent, ExpiryNotifier};
use crate::telemetry;

/// Continuation for a caller waiting on a retry decision.
pub type RetryCallback = Box<dyn FnOnce(RetryDecision) + Send + 'static>;

/// Diagnostic view of the coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub is_refreshing: bool,
    pub is_expired: bool,
    pub pending_count: usize,
}

impl StateSnapshot {
    /// State label for health/logging.
    pub fn label(&self) -> &'static str {
        if self.is_expired {
            "expired"
        } else if self.is_refreshing {
            "refreshing"
        } else {
            "idle"
        }
    }
}

#[derive(Default)]
struct TokenState {
    is_refreshing: bool,
    is_expired: bool,
    pending: VecDeque<RetryCallback>,
    /// Bumped each time the gate opens, so a refresh that was cancelled by
    /// an expiry transition cannot complete a later cycle.
    cycle: u64,
}

impl TokenState {
    /// True while `cycle` is the refresh currently in flight.
    fn is_live(&self, cycle: u64) -> bool {
        self.is_refreshing && self.cycle == cycle
    }

    fn try_start(&mut self) -> Option<u64> {
        if self.is_refreshing || self.is_expired {
            return None;
        }
        self.is_refreshing = true;
        self.cycle += 1;
        Some(self.cycle)
    }

    fn finish(&mut self, success: bool) -> Vec<RetryCallback> {
        self.is_refreshing = false;
        if success {
            self.is_expired = false;
        }
        self.pending.drain(..).collect()
    }

    fn cancel_all(&mut self) -> Vec<RetryCallback> {
        self.is_refreshing = false;
        self.pending.drain(..).collect()
    }
}

/// Arbitrates token refresh for one session.
///
/// Construct once per session and share as `Arc<TokenCoordinator>`.
pub struct TokenCoordinator {
    state: Mutex<TokenState>,
    store: Arc<dyn CredentialStore>,
    executor: RefreshExecutor,
    notifier: Arc<dyn ExpiryNotifier>,
}

impl TokenCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        executor: RefreshExecutor,
        notifier: Arc<dyn ExpiryNotifier>,
    ) -> Self {
        info!(refresh_url = executor.refresh_url(), "token coordinator initialized");
        Self {
            state: Mutex::new(TokenState::default()),
            store,
            executor,
            notifier,
        }
    }

    /// Credential store shared with the request adapter.
    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub async fn state(&self) -> StateSnapshot {
        let state = self.state.lock().await;
        StateSnapshot {
            is_refreshing: state.is_refreshing,
            is_expired: state.is_expired,
            pending_count: state.pending.len(),
        }
    }

    pub async fn set_expired(&self, expired: bool) {
        self.state.lock().await.is_expired = expired;
    }

    pub async fn is_expired(&self) -> bool {
        self.state.lock().await.is_expired
    }

    /// Single-flight gate. Returns true, and marks a refresh in flight, only
    /// when no refresh is running and the session is not expired.
    pub async fn start_refresh(&self) -> bool {
        self.state.lock().await.try_start().is_some()
    }

    /// Queue a caller behind the in-flight refresh.
    ///
    /// Always accepted; callers must not queue while expired (see
    /// `handle_retry`, which checks and queues under one lock).
    pub async fn add_pending_request(&self, callback: RetryCallback) {
        self.state.lock().await.pending.push_back(callback);
    }

    /// End the current refresh. Clears expiry on success. Returns the queued
    /// callbacks in FIFO order without invoking them.
    pub async fn finish_refresh(&self, success: bool) -> Vec<RetryCallback> {
        self.state.lock().await.finish(success)
    }

    /// Abandon the current refresh without touching expiry. Returns the
    /// queued callbacks in FIFO order without invoking them.
    pub async fn cancel_all_requests(&self) -> Vec<RetryCallback> {
        self.state.lock().await.cancel_all()
    }

    /// Decide the fate of a request that failed with `status`.
    ///
    /// `callback` is invoked exactly once. Pass-through and expired cases
    /// invoke it before this returns; 419 callers are queued and resolved
    /// when the refresh cycle they joined completes. The caller that opens
    /// the gate drives the reissue and returns once its cycle has settled.
    pub async fn handle_retry(
        self: &Arc<Self>,
        status: u16,
        error: RequestError,
        callback: RetryCallback,
    ) {
        match classify(status) {
            RetryAction::PassThrough => {
                callback(RetryDecision::FailWith(error));
            }
            RetryAction::TerminalExpiry => {
                warn!(status, "session rejected by server");
                let drained = self.expire().await;
                dispatch(drained, expired_decision());
                callback(expired_decision());
            }
            RetryAction::TriggerRefresh => {
                // Expiry check, enqueue and gate under one lock so a caller
                // can never queue behind a cycle that has already drained.
                let ticket = {
                    let mut state = self.state.lock().await;
                    if state.is_expired {
                        Err(callback)
                    } else {
                        state.pending.push_back(callback);
                        telemetry::record_waiter();
                        Ok((state.try_start(), state.pending.len()))
                    }
                };

                match ticket {
                    Err(callback) => {
                        debug!("session already expired, failing fast");
                        callback(expired_decision());
                    }
                    Ok((Some(cycle), _)) => self.drive_refresh(cycle).await,
                    Ok((None, waiting)) => {
                        debug!(waiting, "refresh in flight, request queued");
                    }
                }
            }
        }
    }

    /// Awaitable form of `handle_retry`.
    pub async fn retry(self: &Arc<Self>, status: u16, error: RequestError) -> RetryDecision {
        let (tx, rx) = oneshot::channel();
        self.handle_retry(
            status,
            error,
            Box::new(move |decision| {
                let _ = tx.send(decision);
            }),
        )
        .await;
        rx.await.unwrap_or_else(|_| {
            RetryDecision::FailWith(RequestError::RefreshFailed(
                "refresh abandoned before completion".into(),
            ))
        })
    }

    /// Install a fresh token pair from an external login and leave Expired.
    pub async fn reset(
        &self,
        access_token: String,
        refresh_token: String,
    ) -> credentials::Result<()> {
        credentials::save_tokens(self.store.as_ref(), access_token, refresh_token).await?;
        self.set_expired(false).await;
        info!("session reset with fresh tokens");
        Ok(())
    }

    /// Explicit logout: wipe tokens and fail any waiters. The expiry
    /// notification is not fired; the host initiated this.
    pub async fn logout(&self) -> credentials::Result<()> {
        let drained = {
            let mut state = self.state.lock().await;
            state.is_expired = true;
            state.cancel_all()
        };
        dispatch(drained, expired_decision());
        credentials::delete_tokens(self.store.as_ref()).await?;
        info!("session logged out");
        Ok(())
    }

    /// Run the reissue for `cycle` on its own task so that dropping the
    /// caller's future cannot strand the queue with `is_refreshing` set.
    async fn drive_refresh(self: &Arc<Self>, cycle: u64) {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run_refresh(cycle).await });
        if let Err(e) = task.await {
            error!(error = %e, cycle, "refresh task failed");
            let drained = self.complete_cycle(cycle, false).await;
            dispatch(
                drained,
                RetryDecision::FailWith(RequestError::RefreshFailed(e.to_string())),
            );
        }
    }

    async fn run_refresh(&self, cycle: u64) {
        debug!(cycle, "starting token refresh");
        match self.executor.request_tokens(self.store.as_ref()).await {
            RefreshOutcome::Success {
                access_token,
                refresh_token,
            } => {
                let (saved, drained) = {
                    let mut state = self.state.lock().await;
                    if !state.is_live(cycle) {
                        debug!(
                            cycle,
                            current = state.cycle,
                            "stale refresh cycle, discarding tokens"
                        );
                        return;
                    }
                    let saved = self
                        .executor
                        .persist(self.store.as_ref(), &access_token, &refresh_token)
                        .await;
                    let drained = state.finish(saved.is_ok());
                    (saved, drained)
                };
                match saved {
                    Ok(()) => {
                        telemetry::record_refresh("success");
                        info!(cycle, waiters = drained.len(), "token refresh succeeded");
                        dispatch(drained, RetryDecision::Retry);
                    }
                    Err(e) => {
                        telemetry::record_refresh("transient");
                        warn!(cycle, waiters = drained.len(), error = %e, "token refresh failed");
                        dispatch(drained, RetryDecision::FailWith(e.into()));
                    }
                }
            }
            RefreshOutcome::RefreshTokenInvalid => {
                telemetry::record_refresh("invalid");
                let Some(drained) = self.transition_to_expired(Some(cycle)).await else {
                    debug!(cycle, "stale refresh cycle rejected, session untouched");
                    return;
                };
                warn!(cycle, waiters = drained.len(), "refresh token invalid, session expired");
                dispatch(drained, expired_decision());
            }
            RefreshOutcome::TransientFailure(e) => {
                telemetry::record_refresh("transient");
                let drained = self.complete_cycle(cycle, false).await;
                warn!(cycle, waiters = drained.len(), error = %e, "token refresh failed");
                dispatch(drained, RetryDecision::FailWith(e.into()));
            }
        }
    }

    /// Finish `cycle` if it is still the live one; a cycle cancelled by an
    /// expiry transition completes as a no-op.
    async fn complete_cycle(&self, cycle: u64, success: bool) -> Vec<RetryCallback> {
        let mut state = self.state.lock().await;
        if !state.is_live(cycle) {
            debug!(cycle, current = state.cycle, "stale refresh cycle completed");
            return Vec::new();
        }
        state.finish(success)
    }

    /// Transition into Expired and drain the queue.
    async fn expire(&self) -> Vec<RetryCallback> {
        self.transition_to_expired(None).await.unwrap_or_default()
    }

    /// Mark the session expired and drain the queue. With `Some(cycle)` the
    /// transition happens only while that cycle is live and `None` is
    /// returned otherwise.
    ///
    /// Token deletion and the expiry notification happen only on the
    /// transition itself, not for callers that find the session already
    /// expired.
    async fn transition_to_expired(&self, cycle: Option<u64>) -> Option<Vec<RetryCallback>> {
        let (transitioned, drained) = {
            let mut state = self.state.lock().await;
            if cycle.is_some_and(|cycle| !state.is_live(cycle)) {
                return None;
            }
            let transitioned = !state.is_expired;
            state.is_expired = true;
            (transitioned, state.cancel_all())
        };

        if transitioned {
            telemetry::record_expiry();
            if let Err(e) = credentials::delete_tokens(self.store.as_ref()).await {
                warn!(error = %e, "failed to delete tokens on expiry");
            }
            self.notifier.notify(ExpiryEvent::RefreshTokenExpired);
            info!("session expired, login required");
        }
        Some(drained)
    }
}

fn expired_decision() -> RetryDecision {
    RetryDecision::FailWith(RequestError::RefreshTokenExpired)
}

/// Hand each callback its decision on a separate task.
fn dispatch(callbacks: Vec<RetryCallback>, decision: RetryDecision) {
    for callback in callbacks {
        let decision = decision.clone();
        tokio::spawn(async move { callback(decision) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use credentials::{ACCESS_TOKEN_KEY, MemoryCredentialStore, REFRESH_TOKEN_KEY};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        coordinator: Arc<TokenCoordinator>,
        store: Arc<MemoryCredentialStore>,
        notifications: Arc<AtomicUsize>,
    }

    fn harness(refresh_url: String, store: MemoryCredentialStore) -> Harness {
        let store = Arc::new(store);
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notifications);
        let notifier: Arc<dyn ExpiryNotifier> = Arc::new(move |_event: ExpiryEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let executor = RefreshExecutor::new(reqwest::Client::new(), refresh_url);
        let coordinator = Arc::new(TokenCoordinator::new(
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            executor,
            notifier,
        ));
        Harness {
            coordinator,
            store,
            notifications,
        }
    }

    /// Coordinator whose reissue endpoint must never be hit.
    fn offline(store: MemoryCredentialStore) -> Harness {
        harness("http://127.0.0.1:9/auth/refresh".into(), store)
    }

    async fn mount_refresh(server: &MockServer, response: ResponseTemplate, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(response)
            .expect(calls)
            .mount(server)
            .await;
    }

    fn new_tokens() -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"accessToken": "AT2", "refreshToken": "RT2"}))
    }

    fn recorder(log: &Arc<StdMutex<Vec<&'static str>>>, tag: &'static str) -> RetryCallback {
        let log = Arc::clone(log);
        Box::new(move |_decision| log.lock().unwrap().push(tag))
    }

    fn expired() -> RetryDecision {
        RetryDecision::FailWith(RequestError::RefreshTokenExpired)
    }

    // -- gate and queue primitives --

    #[tokio::test]
    async fn gate_admits_one_refresh_at_a_time() {
        let h = offline(MemoryCredentialStore::new());

        assert!(h.coordinator.start_refresh().await);
        assert!(!h.coordinator.start_refresh().await);
        assert!(h.coordinator.state().await.is_refreshing);

        h.coordinator.finish_refresh(true).await;
        assert!(h.coordinator.start_refresh().await);
    }

    #[tokio::test]
    async fn gate_stays_closed_while_expired() {
        let h = offline(MemoryCredentialStore::new());
        h.coordinator.set_expired(true).await;

        assert!(!h.coordinator.start_refresh().await);
        assert!(!h.coordinator.state().await.is_refreshing);
    }

    #[tokio::test]
    async fn finish_refresh_drains_in_fifo_order() {
        let h = offline(MemoryCredentialStore::new());
        let log = Arc::new(StdMutex::new(Vec::new()));

        h.coordinator.start_refresh().await;
        for tag in ["a", "b", "c"] {
            h.coordinator.add_pending_request(recorder(&log, tag)).await;
        }
        assert_eq!(h.coordinator.state().await.pending_count, 3);

        let drained = h.coordinator.finish_refresh(true).await;
        for callback in drained {
            callback(RetryDecision::Retry);
        }

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        let state = h.coordinator.state().await;
        assert_eq!(state.pending_count, 0);
        assert!(!state.is_refreshing);
    }

    #[tokio::test]
    async fn finish_refresh_success_clears_expiry() {
        let h = offline(MemoryCredentialStore::new());
        h.coordinator.set_expired(true).await;

        h.coordinator.finish_refresh(false).await;
        assert!(h.coordinator.is_expired().await);

        h.coordinator.finish_refresh(true).await;
        assert!(!h.coordinator.is_expired().await);
    }

    #[tokio::test]
    async fn cancel_all_leaves_expiry_untouched() {
        let h = offline(MemoryCredentialStore::new());
        let log = Arc::new(StdMutex::new(Vec::new()));

        h.coordinator.start_refresh().await;
        h.coordinator.add_pending_request(recorder(&log, "a")).await;
        let drained = h.coordinator.cancel_all_requests().await;

        assert_eq!(drained.len(), 1);
        let state = h.coordinator.state().await;
        assert!(!state.is_refreshing);
        assert!(!state.is_expired);
        assert_eq!(state.pending_count, 0);
    }

    #[test]
    fn snapshot_labels() {
        let mut snapshot = StateSnapshot {
            is_refreshing: false,
            is_expired: false,
            pending_count: 0,
        };
        assert_eq!(snapshot.label(), "idle");
        snapshot.is_refreshing = true;
        assert_eq!(snapshot.label(), "refreshing");
        snapshot.is_expired = true;
        assert_eq!(snapshot.label(), "expired");
    }

    // -- retry scenarios --

    #[tokio::test]
    async fn concurrent_419s_share_one_refresh() {
        let server = MockServer::start().await;
        mount_refresh(
            &server,
            new_tokens().set_delay(Duration::from_millis(200)),
            1,
        )
        .await;
        let h = harness(
            format!("{}/auth/refresh", server.uri()),
            MemoryCredentialStore::with_tokens("AT1", "RT1"),
        );

        let (a, b, c) = tokio::join!(
            h.coordinator.retry(419, RequestError::status(419, "")),
            h.coordinator.retry(419, RequestError::status(419, "")),
            h.coordinator.retry(419, RequestError::status(419, "")),
        );

        assert_eq!(a, RetryDecision::Retry);
        assert_eq!(b, RetryDecision::Retry);
        assert_eq!(c, RetryDecision::Retry);
        assert_eq!(
            h.store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT2")
        );
        assert_eq!(
            h.store.read(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("RT2")
        );
        let state = h.coordinator.state().await;
        assert_eq!(state.label(), "idle");
        assert_eq!(state.pending_count, 0);
    }

    #[tokio::test]
    async fn terminal_status_expires_session() {
        let h = offline(MemoryCredentialStore::with_tokens("AT1", "RT1"));

        let decision = h
            .coordinator
            .retry(401, RequestError::status(401, "unauthorized"))
            .await;

        assert_eq!(decision, expired());
        assert!(h.coordinator.is_expired().await);
        assert!(!h.store.contains(ACCESS_TOKEN_KEY).await.unwrap());
        assert!(!h.store.contains(REFRESH_TOKEN_KEY).await.unwrap());
        assert_eq!(h.notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_terminal_statuses_notify_once() {
        let h = offline(MemoryCredentialStore::with_tokens("AT1", "RT1"));

        for status in [401, 403, 418] {
            let decision = h
                .coordinator
                .retry(status, RequestError::status(status, ""))
                .await;
            assert_eq!(decision, expired(), "status {status}");
        }

        assert_eq!(h.notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_expiring() {
        let server = MockServer::start().await;
        mount_refresh(&server, new_tokens(), 0).await;
        let h = harness(
            format!("{}/auth/refresh", server.uri()),
            MemoryCredentialStore::new(),
        );

        let decision = h
            .coordinator
            .retry(419, RequestError::status(419, ""))
            .await;

        assert!(matches!(
            decision,
            RetryDecision::FailWith(RequestError::RefreshFailed(_))
        ));
        let state = h.coordinator.state().await;
        assert!(!state.is_expired);
        assert!(!state.is_refreshing);
        assert_eq!(h.notifications.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unrelated_status_passes_error_through() {
        let h = offline(MemoryCredentialStore::with_tokens("AT1", "RT1"));
        let original = RequestError::Status {
            status: 500,
            content_type: Some("text/plain".into()),
            body: "boom".into(),
        };

        let decision = h.coordinator.retry(500, original.clone()).await;

        assert_eq!(decision, RetryDecision::FailWith(original));
        let state = h.coordinator.state().await;
        assert_eq!(state.label(), "idle");
        assert_eq!(
            h.store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT1")
        );
    }

    #[tokio::test]
    async fn rejected_refresh_token_expires_every_waiter() {
        let server = MockServer::start().await;
        mount_refresh(
            &server,
            ResponseTemplate::new(418).set_delay(Duration::from_millis(100)),
            1,
        )
        .await;
        let h = harness(
            format!("{}/auth/refresh", server.uri()),
            MemoryCredentialStore::with_tokens("AT1", "RT1"),
        );

        let (a, b) = tokio::join!(
            h.coordinator.retry(419, RequestError::status(419, "")),
            h.coordinator.retry(419, RequestError::status(419, "")),
        );

        assert_eq!(a, expired());
        assert_eq!(b, expired());
        assert!(h.coordinator.is_expired().await);
        assert!(!h.store.contains(REFRESH_TOKEN_KEY).await.unwrap());
        assert_eq!(h.notifications.load(Ordering::SeqCst), 1);

        // Later 419s fail fast without another reissue call
        let later = h
            .coordinator
            .retry(419, RequestError::status(419, ""))
            .await;
        assert_eq!(later, expired());
        assert_eq!(h.notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_allows_a_later_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(&server, new_tokens(), 1).await;
        let h = harness(
            format!("{}/auth/refresh", server.uri()),
            MemoryCredentialStore::with_tokens("AT1", "RT1"),
        );

        let first = h
            .coordinator
            .retry(419, RequestError::status(419, ""))
            .await;
        assert!(matches!(
            first,
            RetryDecision::FailWith(RequestError::RefreshFailed(_))
        ));
        assert!(!h.coordinator.is_expired().await);

        let second = h
            .coordinator
            .retry(419, RequestError::status(419, ""))
            .await;
        assert_eq!(second, RetryDecision::Retry);
        assert_eq!(
            h.store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT2")
        );
    }

    #[tokio::test]
    async fn expiry_during_refresh_wins_over_late_success() {
        let server = MockServer::start().await;
        mount_refresh(
            &server,
            new_tokens().set_delay(Duration::from_millis(300)),
            1,
        )
        .await;
        let h = harness(
            format!("{}/auth/refresh", server.uri()),
            MemoryCredentialStore::with_tokens("AT1", "RT1"),
        );

        let coordinator = Arc::clone(&h.coordinator);
        let waiter = tokio::spawn(async move {
            coordinator
                .retry(419, RequestError::status(419, ""))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.coordinator.state().await.is_refreshing);

        let terminal = h
            .coordinator
            .retry(403, RequestError::status(403, ""))
            .await;
        assert_eq!(terminal, expired());

        // The winner returns only after its reissue call has landed
        assert_eq!(waiter.await.unwrap(), expired());
        assert!(h.coordinator.is_expired().await);
        assert_eq!(h.notifications.load(Ordering::SeqCst), 1);
        assert!(!h.store.contains(ACCESS_TOKEN_KEY).await.unwrap());
        assert!(!h.store.contains(REFRESH_TOKEN_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn rejection_from_cancelled_cycle_leaves_new_session_alone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refreshToken": "RT1"})))
            .respond_with(ResponseTemplate::new(418).set_delay(Duration::from_millis(300)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refreshToken": "RT9"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "AT10", "refreshToken": "RT10"}))
                    .set_delay(Duration::from_millis(600)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(
            format!("{}/auth/refresh", server.uri()),
            MemoryCredentialStore::with_tokens("AT1", "RT1"),
        );

        let coordinator = Arc::clone(&h.coordinator);
        let first = tokio::spawn(async move {
            coordinator
                .retry(419, RequestError::status(419, ""))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Cycle 1 is cancelled by a terminal status, then a fresh login
        // starts cycle 2 while cycle 1's reissue is still outstanding
        h.coordinator
            .retry(401, RequestError::status(401, ""))
            .await;
        h.coordinator
            .reset("AT9".into(), "RT9".into())
            .await
            .unwrap();
        let coordinator = Arc::clone(&h.coordinator);
        let second = tokio::spawn(async move {
            coordinator
                .retry(419, RequestError::status(419, ""))
                .await
        });

        assert_eq!(first.await.unwrap(), expired());
        assert!(!h.coordinator.is_expired().await);
        assert!(h.coordinator.state().await.is_refreshing);

        assert_eq!(second.await.unwrap(), RetryDecision::Retry);
        assert!(!h.coordinator.is_expired().await);
        assert_eq!(h.notifications.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT10")
        );
        assert_eq!(
            h.store.read(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("RT10")
        );
    }

    #[tokio::test]
    async fn expired_session_fails_419_before_returning() {
        let h = offline(MemoryCredentialStore::with_tokens("AT1", "RT1"));
        h.coordinator.set_expired(true).await;
        let log = Arc::new(StdMutex::new(Vec::new()));

        h.coordinator
            .handle_retry(419, RequestError::status(419, ""), recorder(&log, "late"))
            .await;

        // Resolved inline: no queueing, no spawned dispatch
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
        let state = h.coordinator.state().await;
        assert_eq!(state.pending_count, 0);
        assert!(!state.is_refreshing);
    }

    // -- host operations --

    #[tokio::test]
    async fn reset_installs_tokens_and_clears_expiry() {
        let h = offline(MemoryCredentialStore::with_tokens("AT1", "RT1"));
        h.coordinator
            .retry(401, RequestError::status(401, ""))
            .await;
        assert!(h.coordinator.is_expired().await);

        h.coordinator
            .reset("AT9".into(), "RT9".into())
            .await
            .unwrap();

        assert!(!h.coordinator.is_expired().await);
        assert_eq!(
            h.store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT9")
        );
        assert!(h.coordinator.start_refresh().await);
    }

    #[tokio::test]
    async fn logout_fails_waiters_without_notifying() {
        let h = offline(MemoryCredentialStore::with_tokens("AT1", "RT1"));
        let (tx, rx) = oneshot::channel();

        h.coordinator.start_refresh().await;
        h.coordinator
            .add_pending_request(Box::new(move |decision| {
                let _ = tx.send(decision);
            }))
            .await;

        h.coordinator.logout().await.unwrap();

        assert_eq!(rx.await.unwrap(), expired());
        assert!(h.coordinator.is_expired().await);
        assert!(!h.store.contains(ACCESS_TOKEN_KEY).await.unwrap());
        assert_eq!(h.notifications.load(Ordering::SeqCst), 0);
    }
}
