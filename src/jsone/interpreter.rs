//! Expression evaluation

use serde_json::{Map, Value};

use super::error::{Result, TemplateError};
use super::parser::{BinaryOp, Expr, UnaryOp};
use super::scope::{Binding, Scope};
use super::value::{as_f64, as_integer, is_truthy, json_eq, number};

pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
    match expr {
        Expr::Number(n) => to_number(*n),
        Expr::String(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Ident(name) => lookup(name, scope),
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Expr::Object(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), evaluate(value, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Unary(op, operand) => unary(*op, &evaluate(operand, scope)?),
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !is_truthy(&evaluate(lhs, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&evaluate(rhs, scope)?)))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if is_truthy(&evaluate(lhs, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&evaluate(rhs, scope)?)))
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = evaluate(lhs, scope)?;
            let right = evaluate(rhs, scope)?;
            binary(*op, &left, &right)
        }
        Expr::Dot(target, name) => match evaluate(target, scope)? {
            Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
            other => Err(TemplateError::interpreter(format!(
                "infix: . expects objects, got {}",
                super::value::type_name(&other)
            ))),
        },
        Expr::Index(target, index) => {
            let container = evaluate(target, scope)?;
            let index = evaluate(index, scope)?;
            index_into(&container, &index)
        }
        Expr::Slice(target, start, end) => {
            let container = evaluate(target, scope)?;
            let start = slice_bound(start.as_deref(), scope)?;
            let end = slice_bound(end.as_deref(), scope)?;
            slice(&container, start, end)
        }
        Expr::Call(callee, args) => call(callee, args, scope),
    }
}

fn to_number(n: f64) -> Result<Value> {
    number(n).ok_or_else(|| TemplateError::interpreter(format!("{n} is not a finite number")))
}

fn lookup(name: &str, scope: &Scope<'_>) -> Result<Value> {
    match scope.lookup(name) {
        Some(Binding::Value(value)) => Ok(value.clone()),
        Some(Binding::Function(_)) => Err(TemplateError::interpreter(format!(
            "function {name} must be called; evaluated template contained uncalled functions"
        ))),
        None => Err(TemplateError::interpreter(format!(
            "unknown context value {name}"
        ))),
    }
}

fn call(callee: &Expr, args: &[Expr], scope: &Scope<'_>) -> Result<Value> {
    let Expr::Ident(name) = callee else {
        return Err(TemplateError::interpreter(
            "function calls are only supported on named functions",
        ));
    };

    let function = match scope.lookup(name) {
        Some(Binding::Function(function)) => function.clone(),
        Some(Binding::Value(_)) => {
            return Err(TemplateError::interpreter(format!(
                "{name} is not callable"
            )))
        }
        None => {
            return Err(TemplateError::interpreter(format!(
                "unknown context value {name}"
            )))
        }
    };

    let values = args
        .iter()
        .map(|arg| evaluate(arg, scope))
        .collect::<Result<Vec<_>>>()?;

    function
        .call(&values, scope)
        .map_err(TemplateError::interpreter)
}

fn unary(op: UnaryOp, operand: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!is_truthy(operand))),
        UnaryOp::Neg | UnaryOp::Pos => {
            let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
            let n = as_f64(operand).ok_or_else(|| {
                TemplateError::interpreter(format!("unary {symbol} expects number"))
            })?;
            to_number(if op == UnaryOp::Neg { -n } else { n })
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(json_eq(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!json_eq(left, right))),
        BinaryOp::In => contains(left, right).map(Value::Bool),
        BinaryOp::Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::Number(_), Value::Number(_)) => arithmetic(op, left, right),
            _ => Err(expectation(op, "number/string", left, right)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow => {
            arithmetic(op, left, right)
        }
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return Err(expectation(op, "number/string", left, right)),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::LtEq => ordering.is_le(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => {
            unreachable!("short-circuit operators are handled in evaluate")
        }
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
        return Err(expectation(op, "number", left, right));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(TemplateError::interpreter("division by zero"));
            }
            a / b
        }
        _ => a.powf(b),
    };
    to_number(result)
}

fn expectation(op: BinaryOp, expected: &str, left: &Value, right: &Value) -> TemplateError {
    TemplateError::interpreter(format!(
        "infix: {sym} expects {expected} {sym} {expected}, got {} {sym} {}",
        super::value::type_name(left),
        super::value::type_name(right),
        sym = op.symbol(),
    ))
}

fn contains(needle: &Value, haystack: &Value) -> Result<bool> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| json_eq(item, needle))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            _ => Err(TemplateError::interpreter(
                "infix: in-object expects string in object",
            )),
        },
        Value::String(text) => match needle {
            Value::String(sub) => Ok(text.contains(sub.as_str())),
            _ => Err(TemplateError::interpreter(
                "infix: in-string expects string in string",
            )),
        },
        _ => Err(TemplateError::interpreter(
            "infix: in expects array, object or string on the right",
        )),
    }
}

fn index_into(container: &Value, index: &Value) -> Result<Value> {
    match container {
        Value::Object(map) => match index {
            Value::String(key) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
            _ => Err(TemplateError::interpreter("object keys must be strings")),
        },
        Value::Array(items) => {
            let i = element_index(index, items.len())?;
            Ok(items[i].clone())
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let i = element_index(index, chars.len())?;
            Ok(Value::String(chars[i].to_string()))
        }
        other => Err(TemplateError::interpreter(format!(
            "infix: [..] expects object, array, or string, got {}",
            super::value::type_name(other)
        ))),
    }
}

fn element_index(index: &Value, len: usize) -> Result<usize> {
    let i = as_integer(index).ok_or_else(|| {
        TemplateError::interpreter("should only use integers to access arrays or strings")
    })?;
    let resolved = if i < 0 { len as i64 + i } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(TemplateError::interpreter("index out of bounds"));
    }
    Ok(resolved as usize)
}

fn slice_bound(bound: Option<&Expr>, scope: &Scope<'_>) -> Result<Option<i64>> {
    let Some(expr) = bound else {
        return Ok(None);
    };
    match evaluate(expr, scope)? {
        Value::Null => Ok(None),
        value => as_integer(&value).map(Some).ok_or_else(|| {
            TemplateError::interpreter("cannot perform interval access with non-integers")
        }),
    }
}

/// Python-style clamped range
fn slice_range(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let normalize = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
    let from = start.map(normalize).unwrap_or(0);
    let to = end.map(normalize).unwrap_or(len);
    if from >= to {
        (from as usize, from as usize)
    } else {
        (from as usize, to as usize)
    }
}

fn slice(container: &Value, start: Option<i64>, end: Option<i64>) -> Result<Value> {
    match container {
        Value::Array(items) => {
            let (from, to) = slice_range(items.len(), start, end);
            Ok(Value::Array(items[from..to].to_vec()))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (from, to) = slice_range(chars.len(), start, end);
            Ok(Value::String(chars[from..to].iter().collect()))
        }
        other => Err(TemplateError::interpreter(format!(
            "cannot perform interval access on {}",
            super::value::type_name(other)
        ))),
    }
}
