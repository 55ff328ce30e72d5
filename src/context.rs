//! Fixed json-e context for rendering `.taskcluster.yml`
//!
//! Mirrors what the GitHub integration hands to json-e on a push: a
//! `tasks_for` string, the webhook `event`, the cluster root URL and an
//! `as_slugid` function.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::document::ROOT_URL_VARIABLE;
use crate::jsone::{format_timestamp, Context, Function};

pub const TASKS_FOR: &str = "github-push";

/// The rendering context for one validator
#[derive(Debug, Clone)]
pub struct TemplateContext {
    inner: Context,
}

impl TemplateContext {
    /// Context for a `github-push` event against `root_url`
    pub fn github_push(root_url: &str) -> Self {
        let inner = Context::new()
            .with_value("tasks_for", json!(TASKS_FOR))
            .with_value("event", push_event())
            .with_value(ROOT_URL_VARIABLE, json!(root_url))
            .with_value("now", json!(format_timestamp(Utc::now())))
            .with_function(slugid_function());
        Self { inner }
    }

    /// Replace or add a value binding
    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        self.inner.insert_value(name, value);
        self
    }

    pub fn as_context(&self) -> &Context {
        &self.inner
    }
}

impl AsRef<Context> for TemplateContext {
    fn as_ref(&self) -> &Context {
        &self.inner
    }
}

fn push_event() -> Value {
    let owner = json!({
        "login": "mozilla",
        "name": "mozilla",
        "email": "noreply@mozilla.org",
    });
    let author = json!({
        "name": "tcyml",
        "email": "tcyml@example.com",
        "username": "tcyml",
    });

    json!({
        "ref": "refs/heads/master",
        "before": "0000000000000000000000000000000000000000",
        "after": "3bd9b2e96fcdfd4a5a4d6e0d4e6d3e2c1b0a9f8e",
        "repository": {
            "name": "repo",
            "full_name": "mozilla/repo",
            "html_url": "https://github.com/mozilla/repo",
            "clone_url": "https://github.com/mozilla/repo.git",
            "url": "https://github.com/mozilla/repo",
            "default_branch": "master",
            "owner": owner,
        },
        "pusher": {
            "name": "tcyml",
            "email": "tcyml@example.com",
        },
        "sender": {
            "login": "tcyml",
            "id": 1,
        },
        "head_commit": {
            "id": "3bd9b2e96fcdfd4a5a4d6e0d4e6d3e2c1b0a9f8e",
            "message": "Validate .taskcluster.yml",
            "timestamp": "2019-01-01T00:00:00Z",
            "author": author.clone(),
            "committer": author,
        },
    })
}

/// `as_slugid(label)`: same label, same slug within one context
fn slugid_function() -> Function {
    let slugs: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
    Function::new("as_slugid", move |args, _| match args {
        [Value::String(label)] => {
            let mut slugs = slugs.lock();
            let slug = slugs.entry(label.clone()).or_insert_with(nice_slug);
            Ok(Value::String(slug.clone()))
        }
        _ => Err("as_slugid expects a single string label".to_string()),
    })
}

/// v4 uuid, url-safe base64 without padding; the first bit is cleared so
/// slugs never start with `-`
fn nice_slug() -> String {
    let mut bytes = *Uuid::new_v4().as_bytes();
    bytes[0] &= 0x7f;
    URL_SAFE_NO_PAD.encode(bytes)
}
