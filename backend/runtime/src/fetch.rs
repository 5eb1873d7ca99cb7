//! Remote entry retrieval.
//!
//! Absolute `http(s)` URLs go over HTTP. Root-relative URLs (`/modules/..`)
//! go over HTTP when a base origin is configured and are read from the local
//! modules directory otherwise.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use modhost_config::RuntimeConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {cause}")]
    Transport { url: String, cause: String },

    #[error("cannot read {path}: {cause}")]
    Io { path: String, cause: String },

    #[error("unsupported entry URL '{0}'")]
    Unsupported(String),
}

#[async_trait]
pub trait ScriptFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

fn is_absolute_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpFetcher {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout; using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
        }
    }

    pub fn has_base_url(&self) -> bool {
        self.base_url.is_some()
    }

    /// Absolute form of `url`, or `None` when it cannot be fetched over HTTP.
    pub fn resolve(&self, url: &str) -> Option<String> {
        if is_absolute_http(url) {
            return Some(url.to_string());
        }
        match (&self.base_url, url.starts_with('/')) {
            (Some(base), true) => Some(format!("{base}{url}")),
            _ => None,
        }
    }
}

#[async_trait]
impl ScriptFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let target = self
            .resolve(url)
            .ok_or_else(|| FetchError::Unsupported(url.to_string()))?;
        debug!(url = %target, "Fetching module entry");

        let transport = |e: reqwest::Error| FetchError::Transport {
            url: target.clone(),
            cause: e.to_string(),
        };
        let resp = self.client.get(&target).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: target.clone(), status: status.as_u16() });
        }
        let body = resp.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a root-relative URL onto the modules directory. URLs that would
    /// escape the directory are refused.
    pub fn resolve(&self, url: &str) -> Option<PathBuf> {
        if is_absolute_http(url) {
            return None;
        }
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl ScriptFetcher for FsFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = self
            .resolve(url)
            .ok_or_else(|| FetchError::Unsupported(url.to_string()))?;
        debug!(path = %path.display(), "Reading module entry");
        tokio::fs::read(&path).await.map_err(|e| FetchError::Io {
            path: path.display().to_string(),
            cause: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Picks HTTP or the filesystem per URL.
pub struct RoutingFetcher {
    http: HttpFetcher,
    fs: FsFetcher,
}

impl RoutingFetcher {
    pub fn new(http: HttpFetcher, fs: FsFetcher) -> Self {
        Self { http, fs }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            HttpFetcher::new(config.base_url().map(str::to_owned), config.fetch_timeout()),
            FsFetcher::new(config.modules_dir()),
        )
    }
}

#[async_trait]
impl ScriptFetcher for RoutingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if is_absolute_http(url) || self.http.has_base_url() {
            self.http.fetch(url).await
        } else {
            self.fs.fetch(url).await
        }
    }
}
