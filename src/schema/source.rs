//! Where schema documents come from
//!
//! - [`HttpSchemaSource`]: plain GET with `reqwest`
//! - [`DirSchemaSource`]: `<dir>/<last URL segment>`, for offline runs
//! - [`StaticSchemaSource`]: in-memory map that counts requests (tests, benches)

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::HttpSettings;
use crate::error::{Result, TcymlError};

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Transport for raw schema documents
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Fetch the JSON document at `url`
    async fn fetch(&self, url: &str) -> Result<Value>;
}

/// HTTP(S) transport
#[derive(Debug, Clone)]
pub struct HttpSchemaSource {
    client: reqwest::Client,
}

impl HttpSchemaSource {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(settings.user_agent.as_str());
        if let Some(timeout) = settings.timeout() {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| TcymlError::ConfigError {
            reason: format!("Failed to build HTTP client: {}", e),
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SchemaSource for HttpSchemaSource {
    async fn fetch(&self, url: &str) -> Result<Value> {
        debug!(url, "GET schema");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TcymlError::SchemaFetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TcymlError::SchemaStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| TcymlError::SchemaFetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        decode(url, &body)
    }
}

/// Serves `<dir>/<file>` for any URL whose last path segment is `<file>`
#[derive(Debug, Clone)]
pub struct DirSchemaSource {
    dir: PathBuf,
}

impl DirSchemaSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File a URL maps to
    pub fn path_for(&self, url: &str) -> Option<PathBuf> {
        let parsed = url::Url::parse(url).ok()?;
        let file = parsed.path_segments()?.next_back()?;
        if file.is_empty() {
            return None;
        }
        Some(self.dir.join(file))
    }
}

#[async_trait]
impl SchemaSource for DirSchemaSource {
    async fn fetch(&self, url: &str) -> Result<Value> {
        let path = self.path_for(url).ok_or_else(|| TcymlError::SchemaFetch {
            url: url.to_string(),
            reason: "URL has no file name to look up".to_string(),
        })?;
        debug!(url, path = %path.display(), "read schema from disk");

        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| TcymlError::SchemaFetch {
                url: url.to_string(),
                reason: format!("{}: {}", path.display(), e),
            })?;
        decode(url, &body)
    }
}

/// Fixed set of documents keyed by URL
#[derive(Debug, Default)]
pub struct StaticSchemaSource {
    documents: HashMap<String, Value>,
    requests: AtomicUsize,
}

impl StaticSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, url: impl Into<String>, document: Value) -> Self {
        self.documents.insert(url.into(), document);
        self
    }

    /// Number of `fetch` calls so far, hits and misses alike
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn fetch(&self, url: &str) -> Result<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| TcymlError::SchemaStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}

fn decode(url: &str, body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|e| TcymlError::SchemaDecode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
