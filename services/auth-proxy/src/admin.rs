//! Admin API for session management
//!
//! Runs on a separate listener (default 127.0.0.1:9090) and is never exposed
//! alongside the proxy port.
//!
//! Endpoints:
//! - GET    /admin/session: coordinator state, never tokens
//! - POST   /admin/session: install a fresh token pair after an external login
//! - DELETE /admin/session: log out, wiping tokens and failing waiting requests

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Deserialize;
use token_refresh::TokenCoordinator;
use tracing::{info, warn};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    coordinator: Arc<TokenCoordinator>,
}

impl AdminState {
    pub fn new(coordinator: Arc<TokenCoordinator>) -> Self {
        Self { coordinator }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/admin/session",
            get(session_status).post(reset_session).delete(logout),
        )
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /admin/session: current coordinator state.
async fn session_status(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.coordinator.state().await;
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "state": snapshot.label(),
            "is_refreshing": snapshot.is_refreshing,
            "is_expired": snapshot.is_expired,
            "pending_requests": snapshot.pending_count,
        }),
    )
}

/// Request body for POST /admin/session.
#[derive(Deserialize)]
struct SessionTokens {
    access_token: String,
    refresh_token: String,
}

/// POST /admin/session: replace the stored token pair and clear expiry.
async fn reset_session(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<SessionTokens>,
) -> impl IntoResponse {
    if body.access_token.trim().is_empty() || body.refresh_token.trim().is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "access_token and refresh_token must be non-empty" }),
        );
    }

    match state
        .coordinator
        .reset(body.access_token, body.refresh_token)
        .await
    {
        Ok(()) => {
            info!("session reset via admin API");
            json_response(StatusCode::OK, serde_json::json!({ "state": "idle" }))
        }
        Err(e) => {
            warn!(error = %e, "failed to store session tokens");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": format!("failed to store tokens: {e}") }),
            )
        }
    }
}

/// DELETE /admin/session: explicit logout.
async fn logout(State(state): State<AdminState>) -> impl IntoResponse {
    match state.coordinator.logout().await {
        Ok(()) => {
            info!("session logged out via admin API");
            json_response(StatusCode::OK, serde_json::json!({ "state": "expired" }))
        }
        Err(e) => {
            warn!(error = %e, "failed to delete session tokens");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": format!("failed to delete tokens: {e}") }),
            )
        }
    }
}
