//! Builtin functions available to every expression
//!
//! Context bindings with the same name shadow these.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use super::fromnow;
use super::scope::{Binding, Function, Scope};
use super::value::{as_f64, as_integer, number, scalar_to_string, type_name};

type Outcome = std::result::Result<Value, String>;

/// Root frame shared by all renders
pub(crate) static BUILTINS: Lazy<Scope<'static>> = Lazy::new(|| Scope::root(all()));

fn invalid(name: &str) -> String {
    format!("invalid arguments to builtin: {name}")
}

fn register<F>(table: &mut HashMap<String, Binding>, name: &str, f: F)
where
    F: Fn(&[Value], &Scope<'_>) -> Outcome + Send + Sync + 'static,
{
    table.insert(name.to_string(), Binding::Function(Function::new(name, f)));
}

fn numbers(name: &str, args: &[Value]) -> std::result::Result<Vec<f64>, String> {
    args.iter()
        .map(|arg| as_f64(arg).ok_or_else(|| invalid(name)))
        .collect()
}

fn single_number(name: &str, args: &[Value]) -> std::result::Result<f64, String> {
    match args {
        [arg] => as_f64(arg).ok_or_else(|| invalid(name)),
        _ => Err(invalid(name)),
    }
}

fn single_string<'v>(name: &str, args: &'v [Value]) -> std::result::Result<&'v str, String> {
    match args {
        [Value::String(s)] => Ok(s),
        _ => Err(invalid(name)),
    }
}

fn num(name: &str, f: f64) -> Outcome {
    number(f).ok_or_else(|| invalid(name))
}

fn math(table: &mut HashMap<String, Binding>, name: &'static str, op: fn(f64) -> f64) {
    register(table, name, move |args, _| {
        let n = single_number(name, args)?;
        num(name, op(n))
    });
}

fn text(table: &mut HashMap<String, Binding>, name: &'static str, op: fn(&str) -> String) {
    register(table, name, move |args, _| {
        Ok(Value::String(op(single_string(name, args)?)))
    });
}

pub fn all() -> HashMap<String, Binding> {
    let mut table = HashMap::new();

    register(&mut table, "min", |args, _| {
        let ns = numbers("min", args)?;
        let m = ns
            .into_iter()
            .reduce(f64::min)
            .ok_or_else(|| invalid("min"))?;
        num("min", m)
    });
    register(&mut table, "max", |args, _| {
        let ns = numbers("max", args)?;
        let m = ns
            .into_iter()
            .reduce(f64::max)
            .ok_or_else(|| invalid("max"))?;
        num("max", m)
    });

    math(&mut table, "sqrt", f64::sqrt);
    math(&mut table, "ceil", f64::ceil);
    math(&mut table, "floor", f64::floor);
    math(&mut table, "abs", f64::abs);

    text(&mut table, "lowercase", str::to_lowercase);
    text(&mut table, "uppercase", str::to_uppercase);
    text(&mut table, "strip", |s| s.trim().to_string());
    text(&mut table, "lstrip", |s| s.trim_start().to_string());
    text(&mut table, "rstrip", |s| s.trim_end().to_string());

    register(&mut table, "len", |args, _| match args {
        [Value::String(s)] => Ok(Value::from(s.chars().count())),
        [Value::Array(items)] => Ok(Value::from(items.len())),
        _ => Err(invalid("len")),
    });

    register(&mut table, "str", |args, _| match args {
        [value @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))] => {
            scalar_to_string(value)
                .map(Value::String)
                .ok_or_else(|| invalid("str"))
        }
        _ => Err(invalid("str")),
    });

    register(&mut table, "number", |args, _| {
        let s = single_string("number", args)?;
        let f: f64 = s.trim().parse().map_err(|_| invalid("number"))?;
        num("number", f)
    });

    register(&mut table, "split", |args, _| match args {
        [Value::String(s), sep] => {
            let sep = match sep {
                Value::String(sep) => sep.clone(),
                Value::Number(_) => scalar_to_string(sep).unwrap_or_default(),
                _ => return Err(invalid("split")),
            };
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(sep.as_str())
                    .map(|p| Value::String(p.to_string()))
                    .collect()
            };
            Ok(Value::Array(parts))
        }
        _ => Err(invalid("split")),
    });

    register(&mut table, "join", |args, _| match args {
        [Value::Array(items), sep @ (Value::String(_) | Value::Number(_))] => {
            let sep = scalar_to_string(sep).unwrap_or_default();
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::String(_) | Value::Number(_) => {
                        scalar_to_string(item).ok_or_else(|| invalid("join"))
                    }
                    _ => Err(invalid("join")),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Value::String(parts.join(&sep)))
        }
        _ => Err(invalid("join")),
    });

    register(&mut table, "typeof", |args, _| match args {
        [value] => Ok(Value::String(type_name(value).to_string())),
        _ => Err(invalid("typeof")),
    });

    register(&mut table, "defined", |args, scope| {
        let name = single_string("defined", args)?;
        Ok(Value::Bool(scope.lookup(name).is_some()))
    });

    register(&mut table, "range", |args, _| {
        let ints = args
            .iter()
            .map(|a| as_integer(a).ok_or_else(|| invalid("range")))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let (start, end, step) = match ints.as_slice() {
            [start, end] => (*start, *end, 1),
            [start, end, step] if *step != 0 => (*start, *end, *step),
            _ => return Err(invalid("range")),
        };
        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < end) || (step < 0 && i > end) {
            out.push(Value::from(i));
            i += step;
        }
        Ok(Value::Array(out))
    });

    register(&mut table, "fromNow", |args, scope| {
        let (offset, reference) = match args {
            [Value::String(offset)] => (offset, fromnow::reference_time(scope)?),
            [Value::String(offset), Value::String(from)] => {
                (offset, fromnow::parse_timestamp(from)?)
            }
            _ => return Err(invalid("fromNow")),
        };
        fromnow::from_now(offset, reference).map(Value::String)
    });

    table
}
