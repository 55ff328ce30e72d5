//! `$`-operators
//!
//! Each operator owns the whole object it appears in; any key it does not
//! understand is rejected with `$op has undefined properties`.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::error::{Result, TemplateError};
use super::fromnow;
use super::interpreter::evaluate;
use super::parser::parse_expression;
use super::render::{render_value, IDENTIFIER_RE};
use super::scope::Scope;
use super::value::is_truthy;

const OPERATORS: &[&str] = &[
    "$eval",
    "$json",
    "$if",
    "$flatten",
    "$flattenDeep",
    "$fromNow",
    "$let",
    "$map",
    "$reduce",
    "$match",
    "$switch",
    "$merge",
    "$mergeDeep",
    "$reverse",
    "$sort",
];

/// `each(x)`, `each(x, i)`, `each(acc, x, i)`, `by(x)`
static PARAMS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(each|by)\(\s*([^()]*?)\s*\)$").unwrap());

pub(crate) fn is_operator(key: &str) -> bool {
    OPERATORS.contains(&key)
}

pub(crate) fn apply(
    op: &str,
    map: &Map<String, Value>,
    scope: &Scope<'_>,
) -> Result<Option<Value>> {
    match op {
        "$eval" => eval(map, scope),
        "$json" => json(map, scope),
        "$if" => if_then_else(map, scope),
        "$flatten" => flatten(map, scope, false),
        "$flattenDeep" => flatten(map, scope, true),
        "$fromNow" => from_now(map, scope),
        "$let" => let_in(map, scope),
        "$map" => map_each(map, scope),
        "$reduce" => reduce(map, scope),
        "$match" => match_all(map, scope),
        "$switch" => switch(map, scope),
        "$merge" => merge(map, scope, false),
        "$mergeDeep" => merge(map, scope, true),
        "$reverse" => reverse(map, scope),
        "$sort" => sort(map, scope),
        other => Err(TemplateError::template(format!(
            "{other} is not a valid operator"
        ))),
    }
}

// ═══════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════

/// Reject keys other than `op`, `allowed`, and (optionally) one `each(..)`/`by(..)`
fn check_properties(
    op: &str,
    map: &Map<String, Value>,
    allowed: &[&str],
    params_key: Option<&str>,
) -> Result<()> {
    let mut extra: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|k| *k != op && !allowed.contains(k) && Some(*k) != params_key)
        .collect();
    if extra.is_empty() {
        return Ok(());
    }
    extra.sort_unstable();
    Err(TemplateError::template(format!(
        "{op} has undefined properties: {}",
        extra.join(" ")
    )))
}

/// Find the single `each(..)`/`by(..)` key and its parameter names
fn params_key<'m>(map: &'m Map<String, Value>, prefix: &str) -> Option<(&'m str, Vec<String>)> {
    map.keys().find_map(|key| {
        let caps = PARAMS_RE.captures(key)?;
        if &caps[1] != prefix {
            return None;
        }
        let params = caps[2]
            .split(',')
            .map(|p| p.trim().to_string())
            .collect::<Vec<_>>();
        Some((key.as_str(), params))
    })
}

fn valid_params(params: &[String], counts: &[usize]) -> bool {
    counts.contains(&params.len()) && params.iter().all(|p| IDENTIFIER_RE.is_match(p))
}

fn operand<'m>(op: &str, map: &'m Map<String, Value>) -> &'m Value {
    // present by construction: apply() is only called when `op` is a key
    map.get(op).unwrap_or(&Value::Null)
}

fn render_operand(op: &str, map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Value> {
    Ok(render_value(operand(op, map), scope)?.unwrap_or(Value::Null))
}

fn expression_operand<'m>(op: &str, map: &'m Map<String, Value>, message: &str) -> Result<&'m str> {
    operand(op, map)
        .as_str()
        .ok_or_else(|| TemplateError::template(message))
}

fn eval_string(src: &str, scope: &Scope<'_>) -> Result<Value> {
    evaluate(&parse_expression(src)?, scope)
}

// ═══════════════════════════════════════════
// OPERATORS
// ═══════════════════════════════════════════

fn eval(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    check_properties("$eval", map, &[], None)?;
    let src = expression_operand("$eval", map, "$eval must be given a string expression")?;
    eval_string(src, scope).map(Some)
}

fn json(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    check_properties("$json", map, &[], None)?;
    let rendered = render_operand("$json", map, scope)?;
    let text = serde_json::to_string(&rendered)
        .map_err(|e| TemplateError::template(format!("$json could not serialize value: {e}")))?;
    Ok(Some(Value::String(text)))
}

fn if_then_else(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    check_properties("$if", map, &["then", "else"], None)?;
    let condition = expression_operand("$if", map, "$if can evaluate string expressions only")?;
    let branch = if is_truthy(&eval_string(condition, scope)?) {
        map.get("then")
    } else {
        map.get("else")
    };
    match branch {
        Some(template) => render_value(template, scope),
        None => Ok(None),
    }
}

fn flatten(map: &Map<String, Value>, scope: &Scope<'_>, deep: bool) -> Result<Option<Value>> {
    let op = if deep { "$flattenDeep" } else { "$flatten" };
    check_properties(op, map, &[], None)?;
    let Value::Array(items) = render_operand(op, map, scope)? else {
        return Err(TemplateError::template(format!(
            "{op} value must evaluate to an array"
        )));
    };

    fn push_all(out: &mut Vec<Value>, items: Vec<Value>, deep: bool) {
        for item in items {
            match item {
                Value::Array(inner) if deep => push_all(out, inner, deep),
                Value::Array(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
    }

    let mut out = Vec::new();
    push_all(&mut out, items, deep);
    Ok(Some(Value::Array(out)))
}

fn from_now(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    check_properties("$fromNow", map, &["from"], None)?;
    let Value::String(offset) = render_operand("$fromNow", map, scope)? else {
        return Err(TemplateError::template("$fromNow expects a string"));
    };

    let reference = match map.get("from") {
        Some(template) => match render_value(template, scope)? {
            Some(Value::String(from)) => fromnow::parse_timestamp(&from),
            _ => return Err(TemplateError::template("$fromNow from must be a string")),
        },
        None => fromnow::reference_time(scope),
    }
    .map_err(TemplateError::interpreter)?;

    fromnow::from_now(&offset, reference)
        .map(|s| Some(Value::String(s)))
        .map_err(TemplateError::interpreter)
}

fn let_in(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    check_properties("$let", map, &["in"], None)?;
    let Some(body) = map.get("in") else {
        return Err(TemplateError::template(
            "$let operator requires an `in` clause",
        ));
    };
    let Value::Object(bindings) = render_operand("$let", map, scope)? else {
        return Err(TemplateError::template("$let value must be an object"));
    };

    let mut child = scope.child();
    for (name, value) in bindings {
        if !IDENTIFIER_RE.is_match(&name) {
            return Err(TemplateError::template(
                "top level keys of $let must follow /[a-zA-Z_][a-zA-Z0-9_]*/",
            ));
        }
        child.bind_value(name, value);
    }
    render_value(body, &child)
}

fn map_each(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    let usage = "$map requires exactly one other property, each(..)";
    let Some((each_key, params)) = params_key(map, "each") else {
        return Err(TemplateError::template(usage));
    };
    check_properties("$map", map, &[], Some(each_key)).map_err(|_| TemplateError::template(usage))?;
    if !valid_params(&params, &[1, 2]) {
        return Err(TemplateError::template(
            "$map requires each(identifier) or each(identifier, identifier)",
        ));
    }
    let template = &map[each_key];

    match render_operand("$map", map, scope)? {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let mut child = scope.child();
                child.bind_value(params[0].clone(), item);
                if let Some(index_name) = params.get(1) {
                    child.bind_value(index_name.clone(), Value::from(i));
                }
                if let Some(value) = render_value(template, &child)? {
                    out.push(value);
                }
            }
            Ok(Some(Value::Array(out)))
        }
        Value::Object(entries) => {
            let mut out = Map::new();
            for (key, val) in entries {
                let mut child = scope.child();
                if let Some(key_name) = params.get(1) {
                    child.bind_value(params[0].clone(), val);
                    child.bind_value(key_name.clone(), Value::String(key));
                } else {
                    let mut pair = Map::new();
                    pair.insert("key".to_string(), Value::String(key));
                    pair.insert("val".to_string(), val);
                    child.bind_value(params[0].clone(), Value::Object(pair));
                }
                match render_value(template, &child)? {
                    Some(Value::Object(produced)) => out.extend(produced),
                    None => {}
                    Some(_) => {
                        return Err(TemplateError::template(
                            "$map on objects expects each(..) to evaluate to an object",
                        ))
                    }
                }
            }
            Ok(Some(Value::Object(out)))
        }
        _ => Err(TemplateError::template(
            "$map value must evaluate to an array or object",
        )),
    }
}

fn reduce(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    let usage = "$reduce requires initial and each(accumulator, value)";
    let Some((each_key, params)) = params_key(map, "each") else {
        return Err(TemplateError::template(usage));
    };
    check_properties("$reduce", map, &["initial"], Some(each_key))?;
    if !valid_params(&params, &[2, 3]) {
        return Err(TemplateError::template(usage));
    }
    let Some(initial) = map.get("initial") else {
        return Err(TemplateError::template(usage));
    };
    let Value::Array(items) = render_operand("$reduce", map, scope)? else {
        return Err(TemplateError::template("$reduce value must evaluate to an array"));
    };

    let template = &map[each_key];
    let mut acc = render_value(initial, scope)?.unwrap_or(Value::Null);
    for (i, item) in items.into_iter().enumerate() {
        let mut child = scope.child();
        child.bind_value(params[0].clone(), acc.clone());
        child.bind_value(params[1].clone(), item);
        if let Some(index_name) = params.get(2) {
            child.bind_value(index_name.clone(), Value::from(i));
        }
        if let Some(next) = render_value(template, &child)? {
            acc = next;
        }
    }
    Ok(Some(acc))
}

fn match_all(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    check_properties("$match", map, &[], None)?;
    let Value::Object(cases) = operand("$match", map) else {
        return Err(TemplateError::template("$match can evaluate objects only"));
    };

    let mut out = Vec::new();
    for (condition, template) in cases {
        if is_truthy(&eval_string(condition, scope)?) {
            if let Some(value) = render_value(template, scope)? {
                out.push(value);
            }
        }
    }
    Ok(Some(Value::Array(out)))
}

fn switch(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    check_properties("$switch", map, &[], None)?;
    let Value::Object(cases) = operand("$switch", map) else {
        return Err(TemplateError::template("$switch can evaluate objects only"));
    };

    let mut chosen = None;
    for (condition, template) in cases {
        if condition == "$default" {
            continue;
        }
        if is_truthy(&eval_string(condition, scope)?) {
            if chosen.is_some() {
                return Err(TemplateError::template(
                    "$switch can only have one truthy condition",
                ));
            }
            chosen = Some(template);
        }
    }

    match chosen.or_else(|| cases.get("$default")) {
        Some(template) => render_value(template, scope),
        None => Ok(None),
    }
}

fn merge(map: &Map<String, Value>, scope: &Scope<'_>, deep: bool) -> Result<Option<Value>> {
    let op = if deep { "$mergeDeep" } else { "$merge" };
    check_properties(op, map, &[], None)?;
    let not_objects = || {
        TemplateError::template(format!("{op} value must evaluate to an array of objects"))
    };

    let Value::Array(items) = render_operand(op, map, scope)? else {
        return Err(not_objects());
    };

    let mut out = Value::Object(Map::new());
    for item in items {
        if !item.is_object() {
            return Err(not_objects());
        }
        if deep {
            out = merge_deep(out, item);
        } else if let (Value::Object(target), Value::Object(source)) = (&mut out, item) {
            target.extend(source);
        }
    }
    Ok(Some(out))
}

/// Objects merge recursively, arrays concatenate, anything else is replaced
fn merge_deep(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Object(mut l), Value::Object(r)) => {
            for (key, value) in r {
                let merged = match l.remove(&key) {
                    Some(existing) => merge_deep(existing, value),
                    None => value,
                };
                l.insert(key, merged);
            }
            Value::Object(l)
        }
        (Value::Array(mut l), Value::Array(r)) => {
            l.extend(r);
            Value::Array(l)
        }
        (_, right) => right,
    }
}

fn reverse(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    check_properties("$reverse", map, &[], None)?;
    let Value::Array(mut items) = render_operand("$reverse", map, scope)? else {
        return Err(TemplateError::template("$reverse value must evaluate to an array"));
    };
    items.reverse();
    Ok(Some(Value::Array(items)))
}

fn sort(map: &Map<String, Value>, scope: &Scope<'_>) -> Result<Option<Value>> {
    let by = params_key(map, "by");
    check_properties("$sort", map, &[], by.as_ref().map(|(key, _)| *key))?;
    let Value::Array(items) = render_operand("$sort", map, scope)? else {
        return Err(TemplateError::template("$sort value must evaluate to an array"));
    };

    let keys = match &by {
        Some((key, params)) => {
            if !valid_params(params, &[1]) {
                return Err(TemplateError::template("$sort requires by(identifier)"));
            }
            let Some(src) = map[*key].as_str() else {
                return Err(TemplateError::template("$sort by(..) must be a string expression"));
            };
            let expr = parse_expression(src)?;
            items
                .iter()
                .map(|item| {
                    let mut child = scope.child();
                    child.bind_value(params[0].clone(), item.clone());
                    evaluate(&expr, &child)
                })
                .collect::<Result<Vec<_>>>()?
        }
        None => items.clone(),
    };

    let all_numbers = keys.iter().all(Value::is_number);
    let all_strings = keys.iter().all(Value::is_string);
    if !all_numbers && !all_strings {
        return Err(TemplateError::template(
            "$sort requires all sorted values have the same type (number or string)",
        ));
    }

    let mut pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    pairs.sort_by(|(a, _), (b, _)| compare_keys(a, b));
    Ok(Some(Value::Array(pairs.into_iter().map(|(_, v)| v).collect())))
}

fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
    }
}
