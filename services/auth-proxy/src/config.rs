//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Session tokens are never read from the TOML. A host may seed the
//! credential store from AUTH_PROXY_REFRESH_TOKEN / AUTH_PROXY_ACCESS_TOKEN.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const REFRESH_TOKEN_ENV: &str = "AUTH_PROXY_REFRESH_TOKEN";
const ACCESS_TOKEN_ENV: &str = "AUTH_PROXY_ACCESS_TOKEN";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Session and token refresh settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// Full reissue endpoint, e.g. `https://api.example.com/auth/refresh`
    pub refresh_url: String,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    /// Upper bound on a single reissue call. Unset waits on the transport.
    #[serde(default)]
    pub refresh_timeout_secs: Option<u64>,
    /// Retries per proxied request after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_admin_listen_addr")]
    pub admin_listen_addr: SocketAddr,
    #[serde(skip)]
    pub bootstrap: Option<BootstrapTokens>,
}

/// Tokens handed over by the environment at startup.
#[derive(Debug)]
pub struct BootstrapTokens {
    pub refresh_token: Secret<String>,
    pub access_token: Option<Secret<String>>,
}

/// Header to inject into proxied requests
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

impl From<&HeaderInjection> for interceptor::HeaderInjection {
    fn from(header: &HeaderInjection) -> Self {
        Self {
            name: header.name.clone(),
            value: header.value.clone(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_max_retries() -> u32 {
    interceptor::DEFAULT_MAX_RETRIES
}

fn default_admin_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

impl AuthConfig {
    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.refresh_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http_url("upstream_url", &config.proxy.upstream_url)?;
        require_http_url("refresh_url", &config.auth.refresh_url)?;

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.auth.refresh_timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0 when set".into(),
            ));
        }

        config.auth.bootstrap = bootstrap_from_env()?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-proxy.toml")
    }
}

fn require_http_url(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}

/// Read a token variable. Unset is `None`; set but blank is an error.
fn token_from_env(name: &str) -> common::Result<Option<Secret<String>>> {
    match std::env::var(name) {
        Ok(value) => {
            let secret = Secret::new(value.trim().to_owned());
            if secret.is_blank() {
                return Err(common::Error::EmptyEnv { name: name.into() });
            }
            Ok(Some(secret))
        }
        Err(_) => Ok(None),
    }
}

fn bootstrap_from_env() -> common::Result<Option<BootstrapTokens>> {
    let refresh_token = token_from_env(REFRESH_TOKEN_ENV)?;
    let access_token = token_from_env(ACCESS_TOKEN_ENV)?;

    match (refresh_token, access_token) {
        (Some(refresh_token), access_token) => Ok(Some(BootstrapTokens {
            refresh_token,
            access_token,
        })),
        (None, Some(_)) => Err(common::Error::Config(format!(
            "{ACCESS_TOKEN_ENV} requires {REFRESH_TOKEN_ENV}"
        ))),
        (None, None) => Ok(None),
    }
}
