//! json-e template expansion
//!
//! A `.taskcluster.yml` is a json-e template: `${...}` interpolation inside
//! strings and `$`-operators inside objects, evaluated against a context
//! (`tasks_for`, `event`, `as_slugid`, ...).
//!
//! ```text
//! template ──► render_value ──► operators / interpolate ──► interpreter
//!                                                            │
//!                                  lexer ──► parser ──► Expr ┘
//! ```

mod builtins;
mod error;
mod fromnow;
mod interpreter;
mod lexer;
mod operators;
mod parser;
mod render;
mod scope;
mod value;

pub use error::{ErrorKind, Result, TemplateError};
pub use fromnow::format_timestamp;
pub use scope::{Binding, Context, Function, Scope};

use serde_json::Value;

use builtins::BUILTINS;

/// Expand `template` against `context`
///
/// A template that deletes itself entirely (a top-level `$if` with no
/// matching branch) renders to `null`.
pub fn render(template: &Value, context: &Context) -> Result<Value> {
    let mut scope = BUILTINS.child();
    for (name, binding) in context.iter() {
        scope.bind(name.clone(), binding.clone());
    }
    Ok(render::render_value(template, &scope)?.unwrap_or(Value::Null))
}

/// Template engine seam used by the validator
pub trait Expander: Send + Sync {
    fn expand(&self, template: &Value, context: &Context) -> Result<Value>;
}

/// The built-in json-e engine
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonE;

impl Expander for JsonE {
    fn expand(&self, template: &Value, context: &Context) -> Result<Value> {
        render(template, context)
    }
}
