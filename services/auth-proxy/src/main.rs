//! Auth Proxy
//!
//! Single-binary Rust service that:
//! 1. Loads a bearer session from the credential store (or the environment)
//! 2. Listens for incoming requests
//! 3. Attaches the session's access token and proxies upstream
//! 4. On 419 refreshes the token once for all in-flight requests and retries
//! 5. On a dead session (401/403/418, rejected refresh) fails requests with
//!    401 until a new session is installed via the admin API

mod admin;
mod config;
mod error;
mod metrics;
mod proxy;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use credentials::{
    ACCESS_TOKEN_KEY, CachedCredentialStore, CredentialStore, FileCredentialStore,
    REFRESH_TOKEN_KEY,
};
use interceptor::{PassthroughInterceptor, Pipeline};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use token_refresh::{
    BroadcastNotifier, ExpiryEvent, RefreshExecutor, TokenCoordinator, TokenInterceptor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::admin::AdminState;
use crate::config::{BootstrapTokens, Config};
use crate::proxy::ProxyState;

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    coordinator: Arc<TokenCoordinator>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting auth-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        admin_listen_addr = %config.auth.admin_listen_addr,
        upstream_url = %config.proxy.upstream_url,
        refresh_url = %config.auth.refresh_url,
        headers = config.headers.len(),
        "configuration loaded"
    );

    let file_store = FileCredentialStore::load(config.auth.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credentials from {}",
                config.auth.credentials_path.display()
            )
        })?;
    let store: Arc<dyn CredentialStore> = Arc::new(CachedCredentialStore::new(file_store));

    let client = reqwest::Client::new();
    let executor = RefreshExecutor::new(client.clone(), config.auth.refresh_url.clone())
        .with_timeout(config.auth.refresh_timeout());

    let notifier = Arc::new(BroadcastNotifier::default());
    tokio::spawn(watch_expiry(notifier.subscribe()));

    let coordinator = Arc::new(TokenCoordinator::new(
        Arc::clone(&store),
        executor,
        notifier,
    ));

    if let Some(tokens) = config.auth.bootstrap.take() {
        bootstrap_session(&coordinator, tokens)
            .await
            .context("failed to store bootstrap tokens")?;
    }
    if !store
        .contains(REFRESH_TOKEN_KEY)
        .await
        .context("failed to read credential store")?
    {
        warn!("no refresh token stored; requests go out unauthenticated until a session is installed");
    }

    let headers: Vec<interceptor::HeaderInjection> =
        config.headers.iter().map(Into::into).collect();
    let interceptor = TokenInterceptor::new(
        Arc::clone(&coordinator),
        PassthroughInterceptor::new(headers),
    );
    let pipeline = Pipeline::new(client, Arc::new(interceptor))
        .with_max_retries(config.auth.max_retries);

    let app_state = AppState {
        proxy: ProxyState::new(
            pipeline,
            config.proxy.upstream_url.clone(),
            Duration::from_secs(config.proxy.timeout_secs),
        ),
        coordinator: Arc::clone(&coordinator),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.proxy.max_connections);
    let admin_app = admin::build_admin_router(AdminState::new(coordinator));

    let listener = TcpListener::bind(config.proxy.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.proxy.listen_addr))?;
    let admin_listener = TcpListener::bind(config.auth.admin_listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.auth.admin_listen_addr))?;

    info!(
        addr = %config.proxy.listen_addr,
        admin_addr = %config.auth.admin_listen_addr,
        "accepting requests"
    );

    // Drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy_shutdown = wait_for_shutdown(shutdown_rx.clone());
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(proxy_shutdown)
            .await
    });
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(DRAIN_TIMEOUT, async {
        tokio::join!(server_handle, admin_handle)
    })
    .await
    {
        Ok((proxy_result, admin_result)) => {
            for (name, result) in [("proxy", proxy_result), ("admin", admin_result)] {
                match result {
                    Ok(Ok(())) => info!(server = name, "drained"),
                    Ok(Err(e)) => error!(server = name, error = %e, "server error during shutdown"),
                    Err(e) => error!(server = name, error = %e, "server task panicked"),
                }
            }
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Seed the store with tokens handed over by the environment.
///
/// Without an access token only the refresh token is stored; any stale
/// access token is dropped so the next request goes out unauthenticated.
async fn bootstrap_session(
    coordinator: &TokenCoordinator,
    tokens: BootstrapTokens,
) -> credentials::Result<()> {
    let refresh_token = tokens.refresh_token.expose().clone();
    match tokens.access_token {
        Some(access_token) => {
            coordinator
                .reset(access_token.expose().clone(), refresh_token)
                .await?;
        }
        None => {
            let store = coordinator.credential_store();
            store.save(REFRESH_TOKEN_KEY, refresh_token).await?;
            store.delete(ACCESS_TOKEN_KEY).await?;
            coordinator.set_expired(false).await;
        }
    }
    info!("session bootstrapped from environment");
    Ok(())
}

/// Log session expiry so operators know a new login is needed.
async fn watch_expiry(mut events: broadcast::Receiver<ExpiryEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                warn!(
                    event = event.name(),
                    "session expired; install new tokens via POST /admin/session"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "expiry watcher lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Health endpoint: session state, uptime, requests served.
/// Returns 200 while the session is usable, 503 once it has expired.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let requests = state.proxy.requests_total.load(Ordering::Relaxed);
    let errors = state.proxy.errors_total.load(Ordering::Relaxed);
    let session = state.coordinator.state().await;

    let (status_code, status) = if session.is_expired {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (axum::http::StatusCode::OK, "healthy")
    };

    let body = serde_json::json!({
        "status": status,
        "session": session.label(),
        "pending_requests": session.pending_count,
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that proxies all non-health requests to upstream.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
