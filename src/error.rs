//! tcyml error types with error codes
//!
//! Error code ranges:
//! - TCYML-000-009: Document errors
//! - TCYML-010-019: Schema validation errors
//! - TCYML-020-029: Template (json-e) errors
//! - TCYML-030-039: Structural errors
//! - TCYML-040-049: Schema transport errors
//! - TCYML-050-059: Configuration errors

use miette::Diagnostic;
use thiserror::Error;

use crate::jsone::TemplateError;
use crate::schema::Violation;

pub type Result<T> = std::result::Result<T, TcymlError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

fn first_violation(violations: &[Violation]) -> String {
    match violations.first() {
        Some(v) => v.message.clone(),
        None => "no violations reported".to_string(),
    }
}

fn task_suffix(task: &Option<usize>) -> String {
    match task {
        Some(i) => format!(" (task {i})"),
        None => String::new(),
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum TcymlError {
    // ═══════════════════════════════════════════
    // DOCUMENT ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[TCYML-000] Cannot read {path}: {source}")]
    #[diagnostic(code(tcyml::io), help("Check the file path exists and is readable"))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[TCYML-001] Failed to parse {path}: {details}")]
    #[diagnostic(
        code(tcyml::parse_error),
        help("Check YAML syntax: indentation and quoting")
    )]
    ParseError { path: String, details: String },

    // ═══════════════════════════════════════════
    // SCHEMA VALIDATION (010-019)
    // ═══════════════════════════════════════════
    #[error(
        "[TCYML-010] Schema validation failed{}: {}",
        task_suffix(.task),
        first_violation(.violations)
    )]
    #[diagnostic(
        code(tcyml::schema_validation),
        help("Compare the document with the schema it was validated against")
    )]
    SchemaValidation {
        schema_url: String,
        task: Option<usize>,
        violations: Vec<Violation>,
    },

    // ═══════════════════════════════════════════
    // TEMPLATE ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[TCYML-020] {0}")]
    #[diagnostic(
        code(tcyml::template),
        help("Check json-e expressions and the context values they reference")
    )]
    Template(#[from] TemplateError),

    // ═══════════════════════════════════════════
    // STRUCTURAL ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[TCYML-030] {reason}")]
    #[diagnostic(
        code(tcyml::structural),
        help("Each entry of `tasks` must render to a mapping")
    )]
    StructuralError { reason: String },

    // ═══════════════════════════════════════════
    // SCHEMA TRANSPORT (040-049)
    // ═══════════════════════════════════════════
    #[error("[TCYML-040] Failed to fetch schema {url}: {reason}")]
    #[diagnostic(
        code(tcyml::schema_fetch),
        help("Check network access or pass --schema-dir for offline schemas")
    )]
    SchemaFetch { url: String, reason: String },

    #[error("[TCYML-041] Schema {url} returned HTTP {status}")]
    #[diagnostic(
        code(tcyml::schema_status),
        help("Check the schema URL is correct")
    )]
    SchemaStatus { url: String, status: u16 },

    #[error("[TCYML-042] Schema {url} is not valid JSON: {reason}")]
    #[diagnostic(
        code(tcyml::schema_decode),
        help("The URL must serve a JSON document")
    )]
    SchemaDecode { url: String, reason: String },

    #[error("[TCYML-043] Schema {url} could not be compiled: {reason}")]
    #[diagnostic(
        code(tcyml::schema_compile),
        help("Check the schema and every $ref it points to")
    )]
    SchemaCompile { url: String, reason: String },

    // ═══════════════════════════════════════════
    // CONFIGURATION (050-059)
    // ═══════════════════════════════════════════
    #[error("[TCYML-050] Configuration error: {reason}")]
    #[diagnostic(
        code(tcyml::config),
        help("Check ~/.config/tcyml/config.toml syntax")
    )]
    ConfigError { reason: String },
}

impl TcymlError {
    /// Get the error code (e.g., "TCYML-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "TCYML-000",
            Self::ParseError { .. } => "TCYML-001",
            Self::SchemaValidation { .. } => "TCYML-010",
            Self::Template(_) => "TCYML-020",
            Self::StructuralError { .. } => "TCYML-030",
            Self::SchemaFetch { .. } => "TCYML-040",
            Self::SchemaStatus { .. } => "TCYML-041",
            Self::SchemaDecode { .. } => "TCYML-042",
            Self::SchemaCompile { .. } => "TCYML-043",
            Self::ConfigError { .. } => "TCYML-050",
        }
    }

    /// Transport failures can succeed on a later run; content errors cannot
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SchemaFetch { .. } | Self::SchemaStatus { .. })
    }
}

impl FixSuggestion for TcymlError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TcymlError::Io { .. } => Some("Check the file path exists and is readable"),
            TcymlError::ParseError { .. } => Some("Check YAML syntax: indentation and quoting"),
            TcymlError::SchemaValidation { task: Some(_), .. } => {
                Some("Fix the task definition to match the create-task-request schema")
            }
            TcymlError::SchemaValidation { task: None, .. } => {
                Some("Fix the top-level keys (version, tasks, policy) to match the schema")
            }
            TcymlError::Template(_) => {
                Some(
                    "Check json-e expressions; available context: \
                     tasks_for, event, taskcluster_root_url, as_slugid",
                )
            }
            TcymlError::StructuralError { .. } => {
                Some("Make every task render to a mapping after template expansion")
            }
            TcymlError::SchemaFetch { .. } => {
                Some("Check network access or pass --schema-dir for offline schemas")
            }
            TcymlError::SchemaStatus { .. } => Some("Check the schema URL is correct"),
            TcymlError::SchemaDecode { .. } => Some("The schema URL must serve a JSON document"),
            TcymlError::SchemaCompile { .. } => {
                Some("Check the schema and every $ref it points to")
            }
            TcymlError::ConfigError { .. } => Some("Check ~/.config/tcyml/config.toml syntax"),
        }
    }
}
