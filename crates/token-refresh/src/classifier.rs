//! Status code classification for failed requests
//!
//! The server signals an expired access token with 419 and a dead session
//! (refresh token rejected or expired) with 401, 403 or 418. Everything else
//! is not a token problem and passes through untouched. A server contract
//! change only touches the tables below.

/// Access token expired, a refresh may fix it.
pub const ACCESS_TOKEN_EXPIRED: u16 = 419;

/// Session is dead; refreshing will not help.
pub const TERMINAL_EXPIRY_STATUSES: &[u16] = &[401, 403, 418];

/// Statuses that mean "refresh token invalid" when returned by the reissue
/// endpoint itself.
pub const REFRESH_REJECTION_STATUSES: &[u16] = &[403, 418];

/// Reissue response body markers for an expired or revoked refresh token.
const REFRESH_EXPIRED_PATTERNS: &[&str] = &[
    "refresh token expired",
    "refresh_token_expired",
    "refreshtokenexpired",
    "invalid refresh token",
    "invalid_refresh_token",
];

/// What the coordinator should do with a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Run (or join) a coordinated refresh, then retry.
    TriggerRefresh,
    /// Expire the session: wipe tokens, fail every waiter, notify once.
    TerminalExpiry,
    /// Not a token problem; hand the original error back unchanged.
    PassThrough,
}

/// Map an HTTP status from an ordinary request to a retry action.
pub fn classify(status: u16) -> RetryAction {
    if status == ACCESS_TOKEN_EXPIRED {
        RetryAction::TriggerRefresh
    } else if TERMINAL_EXPIRY_STATUSES.contains(&status) {
        RetryAction::TerminalExpiry
    } else {
        RetryAction::PassThrough
    }
}

/// Whether a failed reissue call proves the refresh token itself is invalid.
///
/// True for 403/418 on the reissue endpoint, or for any error body carrying
/// a refresh-token-expired marker (case-insensitive).
pub fn is_refresh_rejection(status: u16, body: &str) -> bool {
    if REFRESH_REJECTION_STATUSES.contains(&status) {
        return true;
    }
    let lower = body.to_lowercase();
    REFRESH_EXPIRED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}
