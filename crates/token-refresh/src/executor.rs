//! Token reissue
//!
//! Performs the single `POST /auth/refresh` call for a refresh cycle and
//! persists the new token pair. The call goes through a passthrough
//! pipeline: a failing reissue must never re-enter the coordinator.

use std::time::Duration;

use common::Secret;
use credentials::{CredentialStore, REFRESH_TOKEN_KEY};
use interceptor::{Pipeline, RequestError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::is_refresh_rejection;
use crate::error::{Error, Result};

/// Body of the reissue request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReissueRequest<'a> {
    refresh_token: &'a str,
}

/// Successful reissue response.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Result of one reissue attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// New tokens issued. Persisted by `perform_refresh`; `request_tokens`
    /// leaves storing them to the caller.
    Success {
        access_token: Secret<String>,
        refresh_token: Secret<String>,
    },
    /// The server rejected the refresh token; the session is dead.
    RefreshTokenInvalid,
    /// Anything else. The session stays alive and a later 419 may retry.
    TransientFailure(Error),
}

/// Issues reissue calls against a fixed endpoint.
pub struct RefreshExecutor {
    pipeline: Pipeline,
    refresh_url: String,
    timeout: Option<Duration>,
}

impl RefreshExecutor {
    /// `refresh_url` is the full reissue endpoint, e.g.
    /// `https://api.example.com/auth/refresh`.
    pub fn new(client: reqwest::Client, refresh_url: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline::passthrough(client),
            refresh_url: refresh_url.into(),
            timeout: None,
        }
    }

    /// Bound the reissue call. `None` waits as long as the transport does.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn refresh_url(&self) -> &str {
        &self.refresh_url
    }

    /// Run one reissue attempt against the stored refresh token and persist
    /// the new pair.
    pub async fn perform_refresh(&self, store: &dyn CredentialStore) -> RefreshOutcome {
        match self.request_tokens(store).await {
            RefreshOutcome::Success {
                access_token,
                refresh_token,
            } => match self.persist(store, &access_token, &refresh_token).await {
                Ok(()) => RefreshOutcome::Success {
                    access_token,
                    refresh_token,
                },
                Err(e) => RefreshOutcome::TransientFailure(e),
            },
            other => other,
        }
    }

    /// Run one reissue attempt without writing the result.
    ///
    /// The caller decides whether the issued pair is still wanted and stores
    /// it with `persist`. A missing refresh token is a local precondition
    /// failure, reported as transient rather than as a server rejection.
    pub async fn request_tokens(&self, store: &dyn CredentialStore) -> RefreshOutcome {
        let refresh_token = match store.read(REFRESH_TOKEN_KEY).await {
            Ok(Some(token)) => Secret::new(token),
            Ok(None) => {
                warn!("no refresh token stored, cannot reissue");
                return RefreshOutcome::TransientFailure(Error::MissingRefreshToken);
            }
            Err(e) => return RefreshOutcome::TransientFailure(e.into()),
        };

        let call = self.reissue(refresh_token.expose());
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(Error::Timeout(limit))),
            None => call.await,
        };

        match result {
            Ok(tokens) => RefreshOutcome::Success {
                access_token: Secret::new(tokens.access_token),
                refresh_token: Secret::new(tokens.refresh_token),
            },
            Err(Error::Rejected { status, body }) if is_refresh_rejection(status, &body) => {
                warn!(status, "refresh token rejected by reissue endpoint");
                RefreshOutcome::RefreshTokenInvalid
            }
            Err(e) => {
                warn!(error = %e, "reissue failed (transient)");
                RefreshOutcome::TransientFailure(e)
            }
        }
    }

    /// Store a reissued pair, refresh token first.
    pub async fn persist(
        &self,
        store: &dyn CredentialStore,
        access_token: &Secret<String>,
        refresh_token: &Secret<String>,
    ) -> Result<()> {
        credentials::save_tokens(
            store,
            access_token.expose().clone(),
            refresh_token.expose().clone(),
        )
        .await
        .inspect_err(|e| warn!(error = %e, "failed to persist reissued tokens"))?;
        info!("access token reissued");
        Ok(())
    }

    /// Send the reissue request and parse the token pair.
    async fn reissue(&self, refresh_token: &str) -> Result<TokenResponse> {
        debug!(url = %self.refresh_url, "sending reissue request");
        let builder = self
            .pipeline
            .client()
            .post(&self.refresh_url)
            .json(&ReissueRequest { refresh_token });

        let response = self.pipeline.execute(builder).await.map_err(|e| match e {
            RequestError::Status { status, body, .. } => Error::Rejected { status, body },
            RequestError::Timeout(msg) => Error::Http(format!("timeout: {msg}")),
            other => Error::Http(other.to_string()),
        })?;

        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        if tokens.access_token.is_empty() || tokens.refresh_token.is_empty() {
            return Err(Error::InvalidResponse("empty token in response".into()));
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credentials::{ACCESS_TOKEN_KEY, MemoryCredentialStore};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor_for(server: &MockServer) -> RefreshExecutor {
        RefreshExecutor::new(
            reqwest::Client::new(),
            format!("{}/auth/refresh", server.uri()),
        )
    }

    #[test]
    fn token_response_uses_camel_case() {
        let json = r#"{"accessToken":"AT2","refreshToken":"RT2"}"#;
        let tokens: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.access_token, "AT2");
        assert_eq!(tokens.refresh_token, "RT2");
    }

    #[tokio::test]
    async fn success_persists_new_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refreshToken": "RT1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "AT2", "refreshToken": "RT2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let outcome = executor_for(&server).perform_refresh(&store).await;

        match outcome {
            RefreshOutcome::Success {
                access_token,
                refresh_token,
            } => {
                assert_eq!(access_token.expose(), "AT2");
                assert_eq!(refresh_token.expose(), "RT2");
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(
            store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT2")
        );
        assert_eq!(
            store.read(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("RT2")
        );
    }

    #[tokio::test]
    async fn request_tokens_leaves_store_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "AT2", "refreshToken": "RT2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let executor = executor_for(&server);
        let outcome = executor.request_tokens(&store).await;

        let (access_token, refresh_token) = match outcome {
            RefreshOutcome::Success {
                access_token,
                refresh_token,
            } => (access_token, refresh_token),
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(
            store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT1")
        );

        executor
            .persist(&store, &access_token, &refresh_token)
            .await
            .unwrap();
        assert_eq!(
            store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT2")
        );
        assert_eq!(
            store.read(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("RT2")
        );
    }

    #[tokio::test]
    async fn missing_refresh_token_is_transient_and_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::new();
        let outcome = executor_for(&server).perform_refresh(&store).await;

        assert!(matches!(
            outcome,
            RefreshOutcome::TransientFailure(Error::MissingRefreshToken)
        ));
    }

    #[tokio::test]
    async fn status_418_means_refresh_token_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(418))
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let outcome = executor_for(&server).perform_refresh(&store).await;

        assert!(matches!(outcome, RefreshOutcome::RefreshTokenInvalid));
        // Deleting tokens is the coordinator's job, not the executor's
        assert!(store.contains(REFRESH_TOKEN_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn status_403_means_refresh_token_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let outcome = executor_for(&server).perform_refresh(&store).await;
        assert!(matches!(outcome, RefreshOutcome::RefreshTokenInvalid));
    }

    #[tokio::test]
    async fn expired_marker_in_body_means_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"code":"REFRESH_TOKEN_EXPIRED"}"#),
            )
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let outcome = executor_for(&server).perform_refresh(&store).await;
        assert!(matches!(outcome, RefreshOutcome::RefreshTokenInvalid));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let outcome = executor_for(&server).perform_refresh(&store).await;

        match outcome {
            RefreshOutcome::TransientFailure(Error::Rejected { status, .. }) => {
                assert_eq!(status, 503)
            }
            other => panic!("expected transient rejection, got {other:?}"),
        }
        assert_eq!(
            store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT1")
        );
    }

    #[tokio::test]
    async fn malformed_body_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let outcome = executor_for(&server).perform_refresh(&store).await;
        assert!(matches!(
            outcome,
            RefreshOutcome::TransientFailure(Error::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn empty_token_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "", "refreshToken": "RT2"})),
            )
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let outcome = executor_for(&server).perform_refresh(&store).await;
        assert!(matches!(
            outcome,
            RefreshOutcome::TransientFailure(Error::InvalidResponse(_))
        ));
        assert_eq!(
            store.read(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("RT1")
        );
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "AT2", "refreshToken": "RT2"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");
        let executor = executor_for(&server).with_timeout(Some(Duration::from_millis(50)));
        let outcome = executor.perform_refresh(&store).await;

        assert!(matches!(
            outcome,
            RefreshOutcome::TransientFailure(Error::Timeout(_))
        ));
        assert_eq!(
            store.read(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("AT1")
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let executor = RefreshExecutor::new(reqwest::Client::new(), "http://127.0.0.1:9/auth/refresh");
        let store = MemoryCredentialStore::with_tokens("AT1", "RT1");

        let outcome = executor.perform_refresh(&store).await;
        assert!(matches!(
            outcome,
            RefreshOutcome::TransientFailure(Error::Http(_))
        ));
    }
}
