//! Compiled JSON Schema and violation classification

use std::collections::HashMap;
use std::fmt;

use jsonschema::{Draft, Retrieve, Uri, Validator};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::{Result, TcymlError};

/// Host of the standard dialect URIs; the schema engine knows these
pub(crate) const META_SCHEMA_HOST: &str = "json-schema.org";

/// Dialect assumed when `$schema` names a service-specific metaschema
///
/// Taskcluster publishes its schemas against its own draft-06 based
/// metaschema.
const CUSTOM_DIALECT_DRAFT: Draft = Draft::Draft6;

/// One schema violation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// JSON pointer into the instance (e.g. "/payload/command")
    pub path: String,
    /// Message as produced by the schema engine
    pub message: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    MissingRequired { field: String },
    UnknownField { field: String },
    TypeMismatch { expected: String },
    InvalidEnum { value: String },
    Other,
}

/// Serves `$ref` targets from documents fetched ahead of compilation
struct PrefetchedRetriever {
    documents: HashMap<String, Value>,
}

impl Retrieve for PrefetchedRetriever {
    fn retrieve(
        &self,
        uri: &Uri<&str>,
    ) -> std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let key = strip_fragment(uri.as_str());
        self.documents
            .get(key)
            .cloned()
            .ok_or_else(|| format!("schema {key} was not prefetched").into())
    }
}

pub(crate) fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

/// A schema ready to validate instances
pub struct CompiledSchema {
    url: String,
    raw: Value,
    validator: Validator,
    required: Vec<String>,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("url", &self.url)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    /// Compile `raw`, resolving external `$ref`s only from `references`
    ///
    /// A schema without `$id` gets `url` as its id so relative references
    /// resolve against where it was fetched from. A `$schema` outside
    /// json-schema.org is dropped and the document is read as draft-06.
    pub fn compile(url: &str, raw: Value, mut references: HashMap<String, Value>) -> Result<Self> {
        let mut root = raw.clone();
        let custom_dialect = drop_custom_dialect(&mut root);
        if let Value::Object(map) = &mut root {
            map.entry("$id")
                .or_insert_with(|| Value::String(url.to_string()));
        }
        for document in references.values_mut() {
            drop_custom_dialect(document);
        }

        let mut opts = jsonschema::options();
        if custom_dialect {
            opts.with_draft(CUSTOM_DIALECT_DRAFT);
        }
        opts.with_retriever(PrefetchedRetriever {
            documents: references,
        });
        let validator = opts.build(&root).map_err(|e| TcymlError::SchemaCompile {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let required = raw
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            url: url.to_string(),
            raw,
            validator,
            required,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Top-level `required` properties
    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Every violation, in the order the engine reports them
    pub fn violations(&self, instance: &Value) -> Vec<Violation> {
        self.validator
            .iter_errors(instance)
            .map(|e| Violation {
                path: e.instance_path.to_string(),
                message: e.to_string(),
                kind: classify(&e),
            })
            .collect()
    }
}

/// Remove a top-level `$schema` the engine would reject as unknown
///
/// Returns true if one was removed.
fn drop_custom_dialect(schema: &mut Value) -> bool {
    let Value::Object(map) = schema else {
        return false;
    };
    let custom = map
        .get("$schema")
        .and_then(Value::as_str)
        .is_some_and(|uri| !is_standard_dialect(uri));
    if custom {
        map.remove("$schema");
    }
    custom
}

fn is_standard_dialect(uri: &str) -> bool {
    Url::parse(uri)
        .is_ok_and(|parsed| parsed.host_str() == Some(META_SCHEMA_HOST))
}

fn classify(error: &jsonschema::ValidationError<'_>) -> ViolationKind {
    let debug = format!("{:?}", error.kind);
    let variant = debug
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .unwrap_or_default();
    let message = error.to_string();

    match variant {
        "Required" => ViolationKind::MissingRequired {
            field: extract_quoted(&message).unwrap_or_else(|| "unknown".to_string()),
        },
        "AdditionalProperties" => ViolationKind::UnknownField {
            field: extract_quoted(&message).unwrap_or_else(|| "unknown".to_string()),
        },
        "Type" => ViolationKind::TypeMismatch {
            expected: message
                .rsplit("of type ")
                .next()
                .map(|t| t.trim_matches('"').to_string())
                .unwrap_or_default(),
        },
        "Enum" => ViolationKind::InvalidEnum {
            value: error.instance.to_string(),
        },
        _ => ViolationKind::Other,
    }
}

/// First `"quoted"` or `'quoted'` span of a message
fn extract_quoted(msg: &str) -> Option<String> {
    for quote in ['"', '\''] {
        if let Some(start) = msg.find(quote) {
            if let Some(end) = msg[start + 1..].find(quote) {
                return Some(msg[start + 1..start + 1 + end].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_schema() -> CompiledSchema {
        let raw = json!({
            "type": "object",
            "required": ["metadata", "payload"],
            "properties": {
                "payload": {
                    "type": "object",
                    "properties": {"command": {"type": "array"}}
                },
                "priority": {"enum": ["lowest", "highest"]}
            },
            "additionalProperties": false
        });
        CompiledSchema::compile("https://x.test/task.json", raw, HashMap::new()).unwrap()
    }

    #[test]
    fn test_required_is_extracted() {
        assert_eq!(task_schema().required(), ["metadata", "payload"]);
    }

    #[test]
    fn test_missing_required() {
        let violations = task_schema().violations(&json!({"payload": {}}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].message, "\"metadata\" is a required property");
        assert_eq!(
            violations[0].kind,
            ViolationKind::MissingRequired {
                field: "metadata".into()
            }
        );
    }

    #[test]
    fn test_type_mismatch_has_path() {
        let instance = json!({"metadata": {}, "payload": {"command": "python3 run.py"}});
        let violations = task_schema().violations(&instance);
        assert_eq!(violations[0].path, "/payload/command");
        assert_eq!(violations[0].message, "\"python3 run.py\" is not of type \"array\"");
        assert_eq!(
            violations[0].kind,
            ViolationKind::TypeMismatch {
                expected: "array".into()
            }
        );
    }

    #[test]
    fn test_unknown_field_and_enum() {
        let instance = json!({"metadata": {}, "payload": {}, "priority": "urgent", "extra": 1});
        let kinds: Vec<_> = task_schema()
            .violations(&instance)
            .into_iter()
            .map(|v| v.kind)
            .collect();
        assert!(kinds
            .iter()
            .any(|k| matches!(k, ViolationKind::UnknownField { field } if field == "extra")));
        assert!(kinds
            .iter()
            .any(|k| matches!(k, ViolationKind::InvalidEnum { value } if value == "\"urgent\"")));
    }

    #[test]
    fn test_external_ref_served_from_references() {
        let raw = json!({
            "type": "object",
            "properties": {"metadata": {"$ref": "task-metadata.json#"}}
        });
        let mut references = HashMap::new();
        references.insert(
            "https://x.test/v1/task-metadata.json".to_string(),
            json!({"type": "object", "required": ["name"]}),
        );
        let schema =
            CompiledSchema::compile("https://x.test/v1/task.json", raw, references).unwrap();

        assert!(schema.is_valid(&json!({"metadata": {"name": "x"}})));
        let violations = schema.violations(&json!({"metadata": {}}));
        assert_eq!(violations[0].message, "\"name\" is a required property");
    }

    #[test]
    fn test_unresolvable_ref_fails_to_compile() {
        let raw = json!({"$ref": "https://x.test/elsewhere.json"});
        let err =
            CompiledSchema::compile("https://x.test/s.json", raw, HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "TCYML-043");
    }

    const TC_METASCHEMA: &str =
        "https://community-tc.services.mozilla.com/schemas/common/metaschema.json#";

    #[test]
    fn test_service_metaschema_compiles_as_draft6() {
        let raw = json!({
            "$schema": TC_METASCHEMA,
            "type": "object",
            "properties": {
                "metadata": {"$ref": "task-metadata.json#"},
                "priority": {"type": "number", "exclusiveMinimum": 0}
            }
        });
        let mut references = HashMap::new();
        references.insert(
            "https://x.test/v1/task-metadata.json".to_string(),
            json!({"$schema": TC_METASCHEMA, "type": "object", "required": ["name"]}),
        );
        let schema =
            CompiledSchema::compile("https://x.test/v1/task.json", raw, references).unwrap();

        // raw keeps what the service published
        assert_eq!(schema.raw()["$schema"], TC_METASCHEMA);
        assert!(schema.is_valid(&json!({"metadata": {"name": "x"}})));
        let violations = schema.violations(&json!({"metadata": {}}));
        assert_eq!(violations[0].message, "\"name\" is a required property");
        // numeric exclusiveMinimum is draft-06; draft-04 expects a boolean
        assert!(!schema.is_valid(&json!({"priority": 0})));
    }

    #[test]
    fn test_standard_dialect_is_kept() {
        let mut schema = json!({"$schema": "http://json-schema.org/draft-06/schema#"});
        assert!(!drop_custom_dialect(&mut schema));
        assert!(schema.get("$schema").is_some());

        let mut schema = json!({"$schema": TC_METASCHEMA});
        assert!(drop_custom_dialect(&mut schema));
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_strip_fragment() {
        assert_eq!(strip_fragment("https://x.test/a.json#/defs"), "https://x.test/a.json");
        assert_eq!(strip_fragment("https://x.test/a.json"), "https://x.test/a.json");
    }
}
