//! Test fixtures and helpers

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tcyml::schema::DirSchemaSource;
use tcyml::{SchemaCache, Validator, ValidatorConfig};

/// Get path to test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Get path to a specific fixture file
pub fn fixture(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Directory holding the offline schema copies
pub fn schemas_dir() -> PathBuf {
    fixtures_dir().join("schemas")
}

/// Parsed JSON of an offline schema
pub fn schema_json(name: &str) -> Value {
    let text = std::fs::read_to_string(schemas_dir().join(name)).unwrap();
    serde_json::from_str(&text).unwrap()
}

/// Validator reading schemas from `tests/fixtures/schemas`
pub fn offline_validator() -> Validator {
    let cache = SchemaCache::new(Arc::new(DirSchemaSource::new(schemas_dir())));
    Validator::with_cache(ValidatorConfig::default(), Arc::new(cache))
}
