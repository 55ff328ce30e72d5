//! `tcyml::validate` reading its settings from the user config file
//!
//! Kept in its own test binary: it points `XDG_CONFIG_HOME` at a temporary
//! directory for the whole process.

#![cfg(target_os = "linux")]

mod common;

use std::fs;

use common::{fixture, schema_json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_validate_fetches_each_schema_once_per_process() {
    let server = MockServer::start().await;
    for (at, file) in [
        (
            "/schemas/github/v1/taskcluster-github-config.v1.json",
            "taskcluster-github-config.v1.json",
        ),
        (
            "/schemas/queue/v1/create-task-request.json",
            "create-task-request.json",
        ),
        ("/schemas/queue/v1/task-metadata.json", "task-metadata.json"),
    ] {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_json(schema_json(file)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config_home = TempDir::new().unwrap();
    fs::create_dir_all(config_home.path().join("tcyml")).unwrap();
    fs::write(
        config_home.path().join("tcyml/config.toml"),
        format!(
            "[schemas]\n\
             config = \"{uri}/schemas/github/v1/taskcluster-github-config.v1.json\"\n\
             task = \"{uri}/schemas/queue/v1/create-task-request.json\"\n\
             \n\
             [context]\n\
             root_url = \"{uri}\"\n",
            uri = server.uri()
        ),
    )
    .unwrap();
    std::env::set_var("XDG_CONFIG_HOME", config_home.path());
    std::env::remove_var("TCYML_ROOT_URL");
    std::env::remove_var("TCYML_HTTP_TIMEOUT");

    for name in ["bugbug.taskcluster.yml", "task-boot.taskcluster.yml"] {
        tcyml::validate(fixture(name)).await.unwrap();
    }
    tcyml::validate(fixture("bugbug.taskcluster.yml"))
        .await
        .unwrap();
}
