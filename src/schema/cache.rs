//! Schema Cache
//!
//! Fetches each schema URL once and keeps the compiled result for the life
//! of the cache.
//!
//! ## Design
//!
//! - Two layers keyed by URL: raw documents and compiled schemas
//! - Thread-safe via DashMap, one `OnceCell` per URL so concurrent callers
//!   share a single in-flight fetch
//! - External `$ref`s are fetched through the raw layer before compiling;
//!   the compiler itself never does I/O
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cache = SchemaCache::new(Arc::new(HttpSchemaSource::new(&settings)?));
//! let schema = cache.get_or_fetch(url).await?;
//! let violations = schema.violations(&document);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use super::compiled::{strip_fragment, CompiledSchema, META_SCHEMA_HOST};
use super::source::{HttpSchemaSource, SchemaSource};
use crate::config::HttpSettings;
use crate::error::Result;

/// Process-wide HTTP caches, one per transport configuration
static SHARED: Lazy<DashMap<HttpSettings, Arc<SchemaCache>>> = Lazy::new(DashMap::new);

/// Keywords whose values are instance data, not subschemas
const DATA_KEYWORDS: [&str; 4] = ["enum", "const", "examples", "default"];

/// Keywords whose values map names to subschemas
const SCHEMA_MAP_KEYWORDS: [&str; 5] = [
    "properties",
    "patternProperties",
    "definitions",
    "$defs",
    "dependencies",
];

/// Statistics about the schema cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Compiled schemas ready for use
    pub schemas: usize,

    /// Raw documents held (schemas plus their `$ref` targets)
    pub documents: usize,

    /// Calls that reached the source
    pub fetches: usize,
}

pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    documents: DashMap<String, Arc<OnceCell<Value>>>,
    compiled: DashMap<String, Arc<OnceCell<Arc<CompiledSchema>>>>,
    fetches: AtomicUsize,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SchemaCache {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            documents: DashMap::new(),
            compiled: DashMap::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Process-wide cache fetching over HTTP with `settings`
    ///
    /// Every caller with equal settings gets the same cache, so schemas are
    /// fetched once per process.
    pub fn shared(settings: &HttpSettings) -> Result<Arc<Self>> {
        if let Some(cache) = SHARED.get(settings) {
            return Ok(cache.value().clone());
        }

        let source = HttpSchemaSource::new(settings)?;
        let cache = SHARED
            .entry(settings.clone())
            .or_insert_with(|| Arc::new(Self::new(Arc::new(source))));
        Ok(cache.value().clone())
    }

    /// Compiled schema for `url`, fetching and compiling on first use
    pub async fn get_or_fetch(&self, url: &str) -> Result<Arc<CompiledSchema>> {
        let key = strip_fragment(url).to_string();
        let cell = self
            .compiled
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(schema) = cell.get() {
            debug!(url = %key, "schema cache hit");
            return Ok(schema.clone());
        }

        cell.get_or_try_init(|| self.compile(&key))
            .await
            .cloned()
    }

    /// Raw JSON document for `url`, fetched at most once
    pub async fn document(&self, url: &str) -> Result<Value> {
        let key = strip_fragment(url).to_string();
        let cell = self
            .documents
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            debug!(url = %key, "fetching schema document");
            self.source.fetch(&key).await
        })
        .await
        .cloned()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            schemas: self
                .compiled
                .iter()
                .filter(|entry| entry.value().initialized())
                .count(),
            documents: self
                .documents
                .iter()
                .filter(|entry| entry.value().initialized())
                .count(),
            fetches: self.fetches.load(Ordering::SeqCst),
        }
    }

    /// Drop everything; the next request fetches again
    pub fn clear(&self) {
        self.compiled.clear();
        self.documents.clear();
    }

    async fn compile(&self, url: &str) -> Result<Arc<CompiledSchema>> {
        let root = self.document(url).await?;
        let references = self.prefetch_references(url, &root).await?;
        debug!(url, references = references.len(), "compiling schema");
        CompiledSchema::compile(url, root, references).map(Arc::new)
    }

    /// Fetch every external document reachable through `$ref`
    async fn prefetch_references(&self, url: &str, root: &Value) -> Result<HashMap<String, Value>> {
        let mut seen: HashSet<String> = HashSet::from([url.to_string()]);
        let mut queue: VecDeque<String> = external_refs(url, root)
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect();
        let mut documents = HashMap::new();

        while let Some(next) = queue.pop_front() {
            let document = self.document(&next).await?;
            for reference in external_refs(&next, &document) {
                if seen.insert(reference.clone()) {
                    queue.push_back(reference);
                }
            }
            if let Some(id) = document.get("$id").and_then(Value::as_str) {
                let id = strip_fragment(id);
                if id != next {
                    documents.insert(id.to_string(), document.clone());
                }
            }
            documents.insert(next, document);
        }
        Ok(documents)
    }
}

/// Absolute, fragment-less URLs of documents other than `base` that
/// `schema` references
fn external_refs(base: &str, schema: &Value) -> Vec<String> {
    let base_url = schema
        .get("$id")
        .and_then(Value::as_str)
        .and_then(|id| Url::parse(id).ok())
        .or_else(|| Url::parse(base).ok());
    let Some(base_url) = base_url else {
        return Vec::new();
    };

    let mut refs = Vec::new();
    collect_refs(schema, &mut refs);

    let own = strip_fragment(base_url.as_str()).to_string();
    let mut out: Vec<String> = Vec::new();
    for reference in refs {
        if reference.starts_with('#') {
            continue;
        }
        let Ok(mut resolved) = base_url.join(reference) else {
            continue;
        };
        resolved.set_fragment(None);
        if resolved.host_str() == Some(META_SCHEMA_HOST) {
            continue;
        }
        let resolved = resolved.to_string();
        if resolved != own && resolved != base && !out.contains(&resolved) {
            out.push(resolved);
        }
    }
    out
}

/// `$ref` strings in a schema
///
/// Keys of `properties` and similar maps are names chosen by the schema
/// author, so a property called `default` is still searched.
fn collect_refs<'v>(schema: &'v Value, out: &mut Vec<&'v str>) {
    match schema {
        Value::Object(map) => {
            for (key, child) in map {
                let key = key.as_str();
                match child {
                    Value::String(reference) if key == "$ref" => out.push(reference),
                    _ if DATA_KEYWORDS.contains(&key) => {}
                    Value::Object(named) if SCHEMA_MAP_KEYWORDS.contains(&key) => {
                        named.values().for_each(|sub| collect_refs(sub, out));
                    }
                    _ => collect_refs(child, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
        _ => {}
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::source::StaticSchemaSource;
    use serde_json::json;

    const TASK_URL: &str = "https://x.test/schemas/queue/v1/create-task-request.json";
    const METADATA_URL: &str = "https://x.test/schemas/queue/v1/task-metadata.json";

    fn source() -> Arc<StaticSchemaSource> {
        Arc::new(
            StaticSchemaSource::new()
                .with_document(
                    TASK_URL,
                    json!({
                        "$schema": "http://json-schema.org/draft-06/schema#",
                        "type": "object",
                        "required": ["metadata"],
                        "properties": {"metadata": {"$ref": "task-metadata.json#"}}
                    }),
                )
                .with_document(
                    METADATA_URL,
                    json!({"type": "object", "required": ["name"]}),
                ),
        )
    }

    // ========================================================================
    // Test: Cache is empty by default
    // ========================================================================
    #[test]
    fn test_cache_empty_by_default() {
        let cache = SchemaCache::new(source());
        assert_eq!(
            cache.stats(),
            CacheStats {
                schemas: 0,
                documents: 0,
                fetches: 0
            }
        );
    }

    // ========================================================================
    // Test: Second request for the same URL never reaches the source
    // ========================================================================
    #[tokio::test]
    async fn test_same_url_fetched_once() {
        let source = source();
        let cache = SchemaCache::new(source.clone());

        let first = cache.get_or_fetch(TASK_URL).await.unwrap();
        let second = cache.get_or_fetch(TASK_URL).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        // the schema itself plus its one $ref target
        assert_eq!(source.requests(), 2);
        assert_eq!(cache.stats().schemas, 1);
        assert_eq!(cache.stats().documents, 2);
    }

    // ========================================================================
    // Test: Fragment does not create a second entry
    // ========================================================================
    #[tokio::test]
    async fn test_fragment_is_ignored_for_keys() {
        let source = source();
        let cache = SchemaCache::new(source.clone());

        cache.get_or_fetch(TASK_URL).await.unwrap();
        cache.get_or_fetch(&format!("{TASK_URL}#")).await.unwrap();
        assert_eq!(source.requests(), 2);
    }

    // ========================================================================
    // Test: Referenced schema is enforced
    // ========================================================================
    #[tokio::test]
    async fn test_ref_target_is_enforced() {
        let cache = SchemaCache::new(source());
        let schema = cache.get_or_fetch(TASK_URL).await.unwrap();

        assert!(schema.is_valid(&json!({"metadata": {"name": "x"}})));
        let violations = schema.violations(&json!({"metadata": {}}));
        assert_eq!(violations[0].message, "\"name\" is a required property");
    }

    // ========================================================================
    // Test: Concurrent callers share one fetch
    // ========================================================================
    #[tokio::test]
    async fn test_concurrent_callers_share_fetch() {
        let source = source();
        let cache = Arc::new(SchemaCache::new(source.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_fetch(TASK_URL).await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(source.requests(), 2);
    }

    // ========================================================================
    // Test: Failed fetch is not cached
    // ========================================================================
    #[tokio::test]
    async fn test_failure_is_retried() {
        let source = Arc::new(StaticSchemaSource::new());
        let cache = SchemaCache::new(source.clone());

        assert!(cache.get_or_fetch("https://x.test/missing.json").await.is_err());
        assert!(cache.get_or_fetch("https://x.test/missing.json").await.is_err());
        assert_eq!(source.requests(), 2);
        assert_eq!(cache.stats().schemas, 0);
    }

    // ========================================================================
    // Test: Service metaschema in $schema does not block compilation
    // ========================================================================
    #[tokio::test]
    async fn test_service_metaschema_is_not_fetched() {
        let metaschema = "https://x.test/schemas/common/metaschema.json#";
        let source = Arc::new(
            StaticSchemaSource::new()
                .with_document(
                    TASK_URL,
                    json!({
                        "$schema": metaschema,
                        "type": "object",
                        "properties": {"metadata": {"$ref": "task-metadata.json#"}}
                    }),
                )
                .with_document(
                    METADATA_URL,
                    json!({"$schema": metaschema, "type": "object", "required": ["name"]}),
                ),
        );
        let cache = SchemaCache::new(source.clone());

        let schema = cache.get_or_fetch(TASK_URL).await.unwrap();
        let violations = schema.violations(&json!({"metadata": {}}));
        assert_eq!(violations[0].message, "\"name\" is a required property");
        // $schema is not a $ref; the metaschema is never requested
        assert_eq!(source.requests(), 2);
    }

    #[test]
    fn test_shared_cache_per_settings() {
        let settings = HttpSettings::default();
        let first = SchemaCache::shared(&settings).unwrap();
        let second = SchemaCache::shared(&settings).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let slower = HttpSettings {
            timeout_secs: Some(90),
            ..HttpSettings::default()
        };
        let other = SchemaCache::shared(&slower).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_property_named_like_data_keyword_is_searched() {
        let schema = json!({
            "properties": {
                "default": {"$ref": "d.json"},
                "enum": {"items": {"$ref": "e.json"}}
            },
            "definitions": {"const": {"$ref": "c.json"}},
            "default": {"$ref": "ignored.json"}
        });
        let mut refs = external_refs("https://x.test/v1/a.json", &schema);
        refs.sort();
        assert_eq!(
            refs,
            vec![
                "https://x.test/v1/c.json",
                "https://x.test/v1/d.json",
                "https://x.test/v1/e.json"
            ]
        );
    }

    #[test]
    fn test_external_refs_resolution() {
        let schema = json!({
            "$id": "https://x.test/v1/a.json#",
            "properties": {
                "local": {"$ref": "#/definitions/x"},
                "sibling": {"$ref": "b.json#"},
                "absolute": {"$ref": "https://other.test/c.json"},
                "meta": {"$ref": "http://json-schema.org/draft-06/schema#"},
                "enum_data": {"enum": [{"$ref": "not-a-ref.json"}]}
            }
        });
        let mut refs = external_refs("https://x.test/v1/a.json", &schema);
        refs.sort();
        assert_eq!(
            refs,
            vec!["https://other.test/c.json", "https://x.test/v1/b.json"]
        );
    }
}
