//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers and any client
//! credentials, and forwards to the upstream URL through the bearer
//! pipeline. The pipeline attaches the session token and handles 419
//! refresh-and-retry; whatever it settles on is relayed back verbatim.

use crate::error::Error;
use crate::metrics;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use interceptor::{Pipeline, RequestError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Inbound headers owned by the proxy, never forwarded from the client.
const CLIENT_STRIPPED_HEADERS: &[&str] = &["authorization", "host", "content-length"];

/// Inbound body size limit.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub pipeline: Pipeline,
    pub upstream_url: String,
    pub timeout: Duration,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

impl ProxyState {
    pub fn new(pipeline: Pipeline, upstream_url: String, timeout: Duration) -> Self {
        Self {
            pipeline,
            upstream_url,
            timeout,
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(err: &Error, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": err.error_type(),
            "message": err.to_string(),
            "request_id": request_id,
        }
    });
    (
        err.status(),
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Proxy an inbound request to upstream through the bearer pipeline.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let method = request.method().clone();

    let response = match forward(state, request).await {
        Ok(response) => response,
        Err(err) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_upstream_error(err.error_type());
            match &err {
                Error::SessionExpired => warn!("session expired, rejecting request"),
                other => error!(error = %other, "proxy request failed"),
            }
            error_response(&err, &request_id)
        }
    };

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
) -> Result<Response, Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();

    // Build the upstream URL by appending the request path and query
    let upstream_url = if let Some(pq) = uri.path_and_query() {
        format!("{}{}", state.upstream_url.trim_end_matches('/'), pq)
    } else {
        state.upstream_url.clone()
    };

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name.as_str()) && !is_client_stripped(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    // Buffered so the pipeline can replay it after a refresh
    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::InvalidRequest(format!("invalid request body: {e}")))?;

    let builder = state
        .pipeline
        .client()
        .request(method, &upstream_url)
        .headers(headers)
        .timeout(state.timeout)
        .body(body);

    match state.pipeline.execute(builder).await {
        Ok(upstream_response) => relay(upstream_response).await,
        Err(RequestError::Status {
            status,
            content_type,
            body,
        }) => Ok(relay_error(status, content_type, body)),
        Err(other) => Err(other.into()),
    }
}

/// Copy a successful upstream response back to the client.
async fn relay(upstream_response: reqwest::Response) -> Result<Response, Error> {
    let status = upstream_response.status();
    let resp_headers = upstream_response.headers().clone();
    let resp_body = upstream_response
        .bytes()
        .await
        .map_err(|e| Error::UpstreamError(format!("upstream response read error: {e}")))?;

    let mut response = Response::builder().status(status);
    for (name, value) in &resp_headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(resp_body))
        .map_err(|e| Error::UpstreamError(format!("response build error: {e}")))
}

/// Rebuild an upstream error status the pipeline decided not to retry.
fn relay_error(status: u16, content_type: Option<String>, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, body).into_response();
    if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        response
            .headers_mut()
            .insert(axum::http::header::CONTENT_TYPE, value);
    }
    response
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_client_stripped(name: &str) -> bool {
    CLIENT_STRIPPED_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
