//! `.taskcluster.yml` validation pipeline
//!
//! 1. load the document
//! 2. pick the top-level schema (default or root-url variant)
//! 3. fetch it through the cache
//! 4. validate the document
//! 5. expand json-e templates
//! 6. check every task is a mapping
//! 7. validate every task against the task schema
//!
//! The first failing step aborts the run.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::ValidatorConfig;
use crate::context::TemplateContext;
use crate::document::{kind_of, ConfigDocument};
use crate::error::{Result, TcymlError};
use crate::jsone::{Expander, JsonE};
use crate::schema::{HttpSchemaSource, SchemaCache};

/// Outcome of a successful validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDocument {
    /// Top-level schema the document was checked against
    pub config_schema: String,
    pub task_schema: String,
    /// Tasks after template expansion
    pub tasks: Vec<Value>,
}

pub struct Validator {
    config: ValidatorConfig,
    cache: Arc<SchemaCache>,
    context: TemplateContext,
    expander: Arc<dyn Expander>,
}

impl Validator {
    /// Validator fetching schemas over HTTP
    pub fn new(config: ValidatorConfig) -> Result<Self> {
        let source = HttpSchemaSource::new(&config.http)?;
        let cache = Arc::new(SchemaCache::new(Arc::new(source)));
        Ok(Self::with_cache(config, cache))
    }

    /// Validator sharing an existing cache
    pub fn with_cache(config: ValidatorConfig, cache: Arc<SchemaCache>) -> Self {
        let context = TemplateContext::github_push(&config.context.root_url);
        Self {
            config,
            cache,
            context,
            expander: Arc::new(JsonE),
        }
    }

    pub fn with_context(mut self, context: TemplateContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_expander(mut self, expander: Arc<dyn Expander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    /// Validate the file at `path`
    pub async fn validate(&self, path: impl AsRef<Path>) -> Result<()> {
        let document = ConfigDocument::load(path)?;
        self.validate_document(&document).await.map(|_| ())
    }

    /// Steps 2 to 7 on an already loaded document
    #[instrument(skip_all, fields(path = %document.path().display()))]
    pub async fn validate_document(&self, document: &ConfigDocument) -> Result<ValidatedDocument> {
        let config_schema = self.config.config_schema_for(document.root_url_hint());
        info!(schema = %config_schema, "validating document");

        let schema = self.cache.get_or_fetch(&config_schema).await?;
        let violations = schema.violations(document.value());
        if !violations.is_empty() {
            return Err(TcymlError::SchemaValidation {
                schema_url: config_schema,
                task: None,
                violations,
            });
        }

        let rendered = self.render(document)?;
        let tasks = tasks_of(&rendered)?;

        let task_schema = self.config.schemas.task.clone();
        if !tasks.is_empty() {
            let schema = self.cache.get_or_fetch(&task_schema).await?;
            for (i, task) in tasks.iter().enumerate() {
                debug!(task = i, "validating task");
                let violations = schema.violations(&task_request(task));
                if !violations.is_empty() {
                    return Err(TcymlError::SchemaValidation {
                        schema_url: task_schema,
                        task: Some(i),
                        violations,
                    });
                }
            }
        }

        info!(tasks = tasks.len(), "document is valid");
        Ok(ValidatedDocument {
            config_schema,
            task_schema,
            tasks,
        })
    }

    /// Expand templates only; tasks are type-checked but not schema-validated
    pub fn render(&self, document: &ConfigDocument) -> Result<Value> {
        let rendered = self
            .expander
            .expand(document.value(), self.context.as_context())?;
        tasks_of(&rendered)?;
        Ok(rendered)
    }
}

/// The create-task request body: `taskId` is the URL parameter, not a field
fn task_request(task: &Value) -> Value {
    let mut request = task.clone();
    if let Value::Object(map) = &mut request {
        map.remove("taskId");
    }
    request
}

/// Expanded tasks; an absent `tasks` key means none
fn tasks_of(rendered: &Value) -> Result<Vec<Value>> {
    let Value::Object(root) = rendered else {
        return Err(TcymlError::StructuralError {
            reason: format!(
                "Document should be of mapping type after template expansion; found: {}",
                kind_of(rendered)
            ),
        });
    };

    let tasks = match root.get("tasks") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(tasks)) => tasks,
        Some(other) => {
            return Err(TcymlError::StructuralError {
                reason: format!(
                    "tasks should be of sequence type after template expansion; found: {}",
                    kind_of(other)
                ),
            })
        }
    };

    for task in tasks {
        if !task.is_object() {
            return Err(TcymlError::StructuralError {
                reason: format!(
                    "Task should be of mapping type after template expansion; found: {}",
                    kind_of(task)
                ),
            });
        }
    }
    Ok(tasks.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_CONFIG_SCHEMA_URL, DEFAULT_TASK_SCHEMA_URL};
    use crate::schema::StaticSchemaSource;
    use serde_json::json;

    fn validator() -> (Validator, Arc<StaticSchemaSource>) {
        let source = Arc::new(
            StaticSchemaSource::new()
                .with_document(
                    DEFAULT_CONFIG_SCHEMA_URL,
                    json!({"type": "object", "required": ["version", "tasks"]}),
                )
                .with_document(
                    "https://tc.example.com/schemas/github/v1/taskcluster-github-config.v1.json",
                    json!({"type": "object", "required": ["version"]}),
                )
                .with_document(
                    DEFAULT_TASK_SCHEMA_URL,
                    json!({
                        "type": "object",
                        "required": ["metadata"],
                        "properties": {"payload": {"properties": {"command": {"type": "array"}}}}
                    }),
                ),
        );
        let mut config = ValidatorConfig::default();
        config.context.root_url = "https://tc.example.com".into();
        let cache = Arc::new(SchemaCache::new(source.clone()));
        (Validator::with_cache(config, cache), source)
    }

    fn doc(yaml: &str) -> ConfigDocument {
        ConfigDocument::parse(yaml, ".taskcluster.yml").unwrap()
    }

    #[tokio::test]
    async fn test_valid_document() {
        let (validator, _) = validator();
        let result = validator
            .validate_document(&doc(concat!(
                "version: 1\n",
                "tasks:\n",
                "  - metadata: {name: '${tasks_for}'}\n",
                "    payload: {command: [ls]}\n",
            )))
            .await
            .unwrap();
        assert_eq!(result.config_schema, DEFAULT_CONFIG_SCHEMA_URL);
        assert_eq!(result.tasks[0]["metadata"]["name"], json!("github-push"));
    }

    #[tokio::test]
    async fn test_root_url_hint_selects_variant() {
        let (validator, _) = validator();
        let result = validator
            .validate_document(&doc(
                "version: 1\ntasks:\n  - metadata: {url: '${taskcluster_root_url}'}\n",
            ))
            .await
            .unwrap();
        assert_eq!(
            result.config_schema,
            "https://tc.example.com/schemas/github/v1/taskcluster-github-config.v1.json"
        );
        assert_eq!(result.tasks[0]["metadata"]["url"], json!("https://tc.example.com"));
    }

    #[tokio::test]
    async fn test_top_level_violation_stops_before_expansion() {
        let (validator, source) = validator();
        let err = validator
            .validate_document(&doc("tasks:\n  - '${undefined}'\n"))
            .await
            .unwrap_err();
        match err {
            TcymlError::SchemaValidation {
                task: None,
                violations,
                ..
            } => {
                assert_eq!(violations[0].message, "\"version\" is a required property");
            }
            other => panic!("expected SchemaValidation, got {other:?}"),
        }
        // task schema never requested
        assert_eq!(source.requests(), 1);
    }

    #[tokio::test]
    async fn test_non_mapping_document_is_schema_violation() {
        let (validator, source) = validator();
        for (yaml, message) in [
            ("- a\n- b\n", "[\"a\",\"b\"] is not of type \"object\""),
            ("", "null is not of type \"object\""),
        ] {
            let err = validator.validate_document(&doc(yaml)).await.unwrap_err();
            assert_eq!(err.code(), "TCYML-010");
            match err {
                TcymlError::SchemaValidation {
                    task: None,
                    violations,
                    ..
                } => assert_eq!(violations[0].message, message),
                other => panic!("expected SchemaValidation, got {other:?}"),
            }
        }
        assert_eq!(source.requests(), 1);
    }

    #[tokio::test]
    async fn test_scalar_task_is_structural_error() {
        let (validator, _) = validator();
        let err = validator
            .validate_document(&doc("version: 1\ntasks:\n  - {metadata: {}}\n  - just a string\n"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "[TCYML-030] Task should be of mapping type after template expansion; found: string"
        );
    }

    #[tokio::test]
    async fn test_tasks_removed_by_if_means_zero_tasks() {
        let (validator, source) = validator();
        let result = validator
            .validate_document(&doc(concat!(
                "version: 1\n",
                "tasks:\n",
                "  $if: 'tasks_for == \"github-pull-request\"'\n",
                "  then:\n",
                "    - metadata: {}\n",
            )))
            .await
            .unwrap();
        assert!(result.tasks.is_empty());
        assert_eq!(source.requests(), 1);
    }

    #[tokio::test]
    async fn test_task_violation_names_index() {
        let (validator, _) = validator();
        let err = validator
            .validate_document(&doc(concat!(
                "version: 1\n",
                "tasks:\n",
                "  - metadata: {}\n",
                "  - metadata: {}\n",
                "    payload: {command: 'python3 run.py'}\n",
            )))
            .await
            .unwrap_err();
        match err {
            TcymlError::SchemaValidation {
                task: Some(1),
                violations,
                ..
            } => {
                assert_eq!(
                    violations[0].message,
                    "\"python3 run.py\" is not of type \"array\""
                );
            }
            other => panic!("expected task SchemaValidation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_schemas_are_cached_across_documents() {
        let (validator, source) = validator();
        let yaml = "version: 1\ntasks:\n  - metadata: {}\n";
        validator.validate_document(&doc(yaml)).await.unwrap();
        validator.validate_document(&doc(yaml)).await.unwrap();
        assert_eq!(source.requests(), 2);
    }

    #[test]
    fn test_task_id_is_not_part_of_request() {
        let request = task_request(&json!({"taskId": "abc", "metadata": {}}));
        assert_eq!(request, json!({"metadata": {}}));
    }

    #[test]
    fn test_render_rejects_mapping_tasks() {
        let (validator, _) = validator();
        let err = validator
            .render(&doc("version: 1\ntasks: {a: 1}\n"))
            .unwrap_err();
        assert!(err.to_string().contains("found: mapping"));
    }

    #[test]
    fn test_render_template_error() {
        let (validator, _) = validator();
        let err = validator
            .render(&doc("version: 1\ntasks:\n  - payload: {command: [a, b, '${tag}']}\n"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "[TCYML-020] InterpreterError at template.tasks[0].payload.command[2]: \
             unknown context value tag"
        );
    }
}
