//! `.taskcluster.yml` loading
//!
//! The document is kept as a `serde_json::Value` tree: both the schema
//! validator and the json-e engine work on JSON values.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Result, TcymlError};

/// Context variable whose presence selects the root-url schema variant
pub const ROOT_URL_VARIABLE: &str = "taskcluster_root_url";

/// A parsed `.taskcluster.yml`
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    path: PathBuf,
    value: Value,
    root_url_hint: bool,
}

impl ConfigDocument {
    /// Read and parse a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TcymlError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse YAML text; `origin` is only used in messages
    ///
    /// Any well-formed YAML is accepted, including an empty document
    /// (`null`). A root that is not a mapping is left for the top-level
    /// schema to reject.
    pub fn parse(text: &str, origin: impl AsRef<Path>) -> Result<Self> {
        let origin = origin.as_ref();
        let parse_error = |details: String| TcymlError::ParseError {
            path: origin.display().to_string(),
            details,
        };

        let yaml: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| parse_error(e.to_string()))?;
        let value = serde_json::to_value(yaml)
            .map_err(|e| parse_error(e.to_string()))?;

        let root_url_hint = value.is_object() && mentions(&value, ROOT_URL_VARIABLE);
        Ok(Self {
            path: origin.to_path_buf(),
            value,
            root_url_hint,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// `version` as written, if it is an integer
    pub fn version(&self) -> Option<i64> {
        self.value.get("version").and_then(Value::as_i64)
    }

    /// True if any key or string value refers to `taskcluster_root_url`
    pub fn root_url_hint(&self) -> bool {
        self.root_url_hint
    }
}

/// YAML-flavoured type name for messages
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn mentions(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.contains(needle),
        Value::Array(items) => items.iter().any(|v| mentions(v, needle)),
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| k.contains(needle) || mentions(v, needle)),
        _ => false,
    }
}
