//! tcyml - `.taskcluster.yml` validator
//!
//! Validates a Taskcluster GitHub configuration file: the document against
//! the published config schema, json-e expansion with a github-push context,
//! then every expanded task against the create-task-request schema.

use std::path::Path;

pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod jsone;
pub mod schema;
pub mod validator;

pub use config::ValidatorConfig;
pub use context::TemplateContext;
pub use document::ConfigDocument;
pub use error::{FixSuggestion, Result, TcymlError};
pub use schema::{CacheStats, CompiledSchema, SchemaCache, SchemaSource, Violation, ViolationKind};
pub use validator::{ValidatedDocument, Validator};

/// Validate a file with the configuration from `~/.config/tcyml/config.toml`
/// and the environment
///
/// Schemas are fetched once per process and reused by later calls.
pub async fn validate(path: impl AsRef<Path>) -> Result<()> {
    let config = ValidatorConfig::load()?.with_env()?;
    validate_with(config, path).await
}

/// [`validate`] with an explicit configuration
pub async fn validate_with(config: ValidatorConfig, path: impl AsRef<Path>) -> Result<()> {
    let cache = SchemaCache::shared(&config.http)?;
    Validator::with_cache(config, cache).validate(path).await
}
