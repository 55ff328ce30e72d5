//! Template walk: strings, arrays, objects
//!
//! `None` is the delete marker: an `$if` without a matching branch, a
//! `$switch` with no truthy case. Arrays drop deleted elements and objects
//! drop deleted keys.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::error::{Result, TemplateError};
use super::interpreter::evaluate;
use super::operators;
use super::parser::parse_interpolation;
use super::scope::Scope;
use super::value::scalar_to_string;

pub(crate) static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap());

pub(crate) fn render_value(template: &Value, scope: &Scope<'_>) -> Result<Option<Value>> {
    match template {
        Value::String(s) => interpolate(s, scope).map(|s| Some(Value::String(s))),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let rendered =
                    render_value(item, scope).map_err(|e| e.within(&format!("[{i}]")))?;
                if let Some(value) = rendered {
                    out.push(value);
                }
            }
            Ok(Some(Value::Array(out)))
        }
        Value::Object(map) => render_object(map, scope),
        scalar => Ok(Some(scalar.clone())),
    }
}

fn render_object(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    let mut found = map
        .keys()
        .filter(|k| operators::is_operator(k))
        .map(String::as_str);
    if let Some(op) = found.next() {
        if found.next().is_some() {
            return Err(TemplateError::template("only one operator allowed"));
        }
        return operators::apply(op, map, scope);
    }

    let mut out = Map::new();
    for (key, value) in map {
        let key = if let Some(escaped) = key.strip_prefix("$$") {
            format!("${escaped}")
        } else if key
            .strip_prefix('$')
            .is_some_and(|rest| IDENTIFIER_RE.is_match(rest))
        {
            return Err(TemplateError::template(
                "$<identifier> is reserved; use $$<identifier>",
            ));
        } else {
            interpolate(key, scope)?
        };

        let rendered = render_value(value, scope).map_err(|e| e.within(&key_segment(&key)))?;
        if let Some(value) = rendered {
            out.insert(key, value);
        }
    }
    Ok(Some(Value::Object(out)))
}

/// `.name` for identifier keys, `["some key"]` otherwise
fn key_segment(key: &str) -> String {
    if IDENTIFIER_RE.is_match(key) {
        format!(".{key}")
    } else {
        format!("[{}]", Value::String(key.to_string()))
    }
}

/// Expand `${expr}` occurrences; `$${` produces a literal `${`
pub(crate) fn interpolate(text: &str, scope: &Scope<'_>) -> Result<String> {
    if !text.contains("${") {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find('$') {
        let at = cursor + offset;
        let rest = &text[at..];

        if rest.starts_with("$${") {
            out.push_str(&text[cursor..at]);
            out.push_str("${");
            cursor = at + 3;
        } else if rest.starts_with("${") {
            out.push_str(&text[cursor..at]);
            let (expr, end) = parse_interpolation(text, at + 2)?;
            let value = evaluate(&expr, scope)?;
            match value {
                Value::Null => {}
                other => {
                    let rendered = scalar_to_string(&other).ok_or_else(|| {
                        TemplateError::template(format!(
                            "interpolation of '{}' produced an array or object",
                            text[at + 2..end - 1].trim()
                        ))
                    })?;
                    out.push_str(&rendered);
                }
            }
            cursor = end;
        } else {
            out.push_str(&text[cursor..=at]);
            cursor = at + 1;
        }
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}
