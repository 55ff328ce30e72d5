//! tcyml Configuration Module
//!
//! Schema URLs, HTTP settings and the template context root URL.
//! Config is stored in `~/.config/tcyml/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Command line flags (`--root-url`, `--schema-dir`)
//! 2. Environment variables (`TCYML_ROOT_URL`, `TCYML_HTTP_TIMEOUT`)
//! 3. Config file (`~/.config/tcyml/config.toml`)
//! 4. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TcymlError};

pub const DEFAULT_ROOT_URL: &str = "https://community-tc.services.mozilla.com";

/// Top-level schema for documents without the root-url hint
///
/// With the default root URL the root-url variant resolves to this same
/// URL; the two diverge once `context.root_url` or
/// `schemas.root_url_config` points at another deployment.
pub const DEFAULT_CONFIG_SCHEMA_URL: &str =
    "https://community-tc.services.mozilla.com/schemas/github/v1/taskcluster-github-config.v1.json";
pub const DEFAULT_TASK_SCHEMA_URL: &str =
    "https://community-tc.services.mozilla.com/schemas/queue/v1/create-task-request.json";

const ROOT_URL_CONFIG_SCHEMA_PATH: &str = "/schemas/github/v1/taskcluster-github-config.v1.json";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub schemas: SchemaUrls,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub context: ContextSettings,
}

/// Where schemas are fetched from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaUrls {
    /// Top-level `.taskcluster.yml` schema
    pub config: String,

    /// Top-level schema for documents that reference `taskcluster_root_url`;
    /// derived from `context.root_url` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_url_config: Option<String>,

    /// Per-task schema (create-task-request)
    pub task: String,
}

impl Default for SchemaUrls {
    fn default() -> Self {
        Self {
            config: DEFAULT_CONFIG_SCHEMA_URL.to_string(),
            root_url_config: None,
            task: DEFAULT_TASK_SCHEMA_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct HttpSettings {
    /// Request timeout; the client default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            user_agent: concat!("tcyml/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextSettings {
    /// Value of `taskcluster_root_url` in the template context
    pub root_url: String,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            root_url: DEFAULT_ROOT_URL.to_string(),
        }
    }
}

impl ValidatorConfig {
    /// Returns `~/.config/tcyml/` on Unix, `%APPDATA%/tcyml/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tcyml")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default location
    ///
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| TcymlError::ConfigError {
            reason: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TcymlError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TcymlError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`with_env`](Self::with_env) with an explicit lookup
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TCYML_ROOT_URL").filter(|v| !v.is_empty()) {
            self.context.root_url = url;
        }

        if let Some(secs) = lookup("TCYML_HTTP_TIMEOUT").filter(|v| !v.is_empty()) {
            let secs = secs.trim().parse().map_err(|_| TcymlError::ConfigError {
                reason: format!("TCYML_HTTP_TIMEOUT must be a number of seconds, got '{secs}'"),
            })?;
            self.http.timeout_secs = Some(secs);
        }

        Ok(self)
    }

    /// Top-level schema URL for documents that reference `taskcluster_root_url`
    pub fn root_url_config_schema(&self) -> String {
        match &self.schemas.root_url_config {
            Some(url) => url.clone(),
            None => format!(
                "{}{}",
                self.context.root_url.trim_end_matches('/'),
                ROOT_URL_CONFIG_SCHEMA_PATH
            ),
        }
    }

    /// Pick the top-level schema URL for a document
    pub fn config_schema_for(&self, root_url_hint: bool) -> String {
        if root_url_hint {
            self.root_url_config_schema()
        } else {
            self.schemas.config.clone()
        }
    }
}
