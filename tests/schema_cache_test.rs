//! Schema fetching over HTTP using wiremock
//!
//! `expect(n)` on each mock is verified when the server drops, so every test
//! here also asserts how many requests reached the transport.

mod common;

use std::sync::Arc;

use common::{fixture, schema_json};
use tcyml::config::HttpSettings;
use tcyml::schema::HttpSchemaSource;
use tcyml::{SchemaCache, TcymlError, Validator, ValidatorConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG_PATH: &str = "/schemas/github/v1/taskcluster-github-config.v1.json";
const TASK_PATH: &str = "/schemas/queue/v1/create-task-request.json";
const METADATA_PATH: &str = "/schemas/queue/v1/task-metadata.json";

// =============================================================================
// HELPERS
// =============================================================================

fn http_cache() -> SchemaCache {
    let source = HttpSchemaSource::new(&HttpSettings::default()).unwrap();
    SchemaCache::new(Arc::new(source))
}

async fn mount_schema(server: &MockServer, at: &str, file: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(schema_json(file)))
        .expect(times)
        .mount(server)
        .await;
}

/// Config pointing every schema URL and the root URL at `server`
fn config_for(server: &MockServer) -> ValidatorConfig {
    let mut config = ValidatorConfig::default();
    config.schemas.config = format!("{}{}", server.uri(), CONFIG_PATH);
    config.schemas.task = format!("{}{}", server.uri(), TASK_PATH);
    config.context.root_url = server.uri();
    config
}

// =============================================================================
// CACHING
// =============================================================================

#[tokio::test]
async fn test_same_url_is_fetched_once() {
    let server = MockServer::start().await;
    mount_schema(&server, METADATA_PATH, "task-metadata.json", 1).await;

    let cache = http_cache();
    let url = format!("{}{}", server.uri(), METADATA_PATH);
    let first = cache.get_or_fetch(&url).await.unwrap();
    let second = cache.get_or_fetch(&url).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.required(), ["name", "description", "owner", "source"]);
    assert_eq!(cache.stats().fetches, 1);
}

#[tokio::test]
async fn test_ref_target_fetched_once_for_many_validations() {
    let server = MockServer::start().await;
    mount_schema(&server, CONFIG_PATH, "taskcluster-github-config.v1.json", 1).await;
    mount_schema(&server, TASK_PATH, "create-task-request.json", 1).await;
    mount_schema(&server, METADATA_PATH, "task-metadata.json", 1).await;

    let validator = Validator::new(config_for(&server)).unwrap();
    for _ in 0..3 {
        validator
            .validate(fixture("bugbug.taskcluster.yml"))
            .await
            .unwrap();
    }
    assert_eq!(validator.cache().stats().fetches, 3);
}

#[tokio::test]
async fn test_free_function_reuses_schemas_across_calls() {
    let server = MockServer::start().await;
    mount_schema(&server, CONFIG_PATH, "taskcluster-github-config.v1.json", 1).await;
    mount_schema(&server, TASK_PATH, "create-task-request.json", 1).await;
    mount_schema(&server, METADATA_PATH, "task-metadata.json", 1).await;

    for _ in 0..2 {
        tcyml::validate_with(config_for(&server), fixture("bugbug.taskcluster.yml"))
            .await
            .unwrap();
    }
    let shared = SchemaCache::shared(&HttpSettings::default()).unwrap();
    assert!(shared.stats().schemas >= 2);
}

#[tokio::test]
async fn test_root_url_variant_is_fetched_from_root_url() {
    let server = MockServer::start().await;
    mount_schema(&server, CONFIG_PATH, "taskcluster-github-config.v1.json", 1).await;
    mount_schema(&server, TASK_PATH, "create-task-request.json", 1).await;
    mount_schema(&server, METADATA_PATH, "task-metadata.json", 1).await;

    let mut config = config_for(&server);
    // default variant lives elsewhere; only the root-url variant may be used
    config.schemas.config = "http://127.0.0.1:9/unused.json".to_string();

    let validator = Validator::new(config).unwrap();
    let document = tcyml::ConfigDocument::load(fixture("task-boot.taskcluster.yml")).unwrap();
    let validated = validator.validate_document(&document).await.unwrap();

    assert_eq!(validated.config_schema, format!("{}{}", server.uri(), CONFIG_PATH));
    assert_eq!(
        validated.tasks[0]["payload"]["env"]["TASKCLUSTER_ROOT_URL"],
        server.uri().as_str()
    );
}

// =============================================================================
// TRANSPORT ERRORS
// =============================================================================

#[tokio::test]
async fn test_not_found_is_schema_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = http_cache()
        .get_or_fetch(&format!("{}{}", server.uri(), CONFIG_PATH))
        .await
        .unwrap_err();
    assert!(matches!(err, TcymlError::SchemaStatus { status: 404, .. }));
}

#[tokio::test]
async fn test_html_body_is_schema_decode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = http_cache()
        .get_or_fetch(&format!("{}{}", server.uri(), CONFIG_PATH))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TCYML-042");
}

#[tokio::test]
async fn test_missing_ref_target_is_status_error() {
    let server = MockServer::start().await;
    mount_schema(&server, TASK_PATH, "create-task-request.json", 1).await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = http_cache()
        .get_or_fetch(&format!("{}{}", server.uri(), TASK_PATH))
        .await
        .unwrap_err();
    match err {
        TcymlError::SchemaStatus { url, status } => {
            assert_eq!(status, 500);
            assert!(url.ends_with(METADATA_PATH));
        }
        other => panic!("expected SchemaStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_host_is_schema_fetch() {
    let err = http_cache()
        .get_or_fetch("http://127.0.0.1:9/schema.json")
        .await
        .unwrap_err();
    assert!(matches!(err, TcymlError::SchemaFetch { .. }));
    assert!(err.is_transient());
}
