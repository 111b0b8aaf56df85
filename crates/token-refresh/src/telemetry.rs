//! Refresh counters
//!
//! - `token_refresh_total` (counter): label `outcome` = success | invalid | transient
//! - `token_refresh_waiters_total` (counter): callers queued behind a refresh
//! - `token_expiry_transitions_total` (counter): transitions into expired
//!
//! No-ops unless the host installs a recorder.

pub(crate) fn record_refresh(outcome: &'static str) {
    metrics::counter!("token_refresh_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_waiter() {
    metrics::counter!("token_refresh_waiters_total").increment(1);
}

pub(crate) fn record_expiry() {
    metrics::counter!("token_expiry_transitions_total").increment(1);
}
