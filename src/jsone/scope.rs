//! Rendering context: values and callable functions
//!
//! `Context` is the public, owned mapping handed to `render`. `Scope` is the
//! evaluation-time chain of frames: builtins at the root, the caller's
//! context above them, and one short-lived frame per `$let`, `$map` or
//! `$reduce` iteration.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Native function callable from expressions
///
/// Errors are plain messages; the interpreter turns them into
/// `InterpreterError`s at the call site.
pub type NativeFn =
    dyn Fn(&[Value], &Scope<'_>) -> std::result::Result<Value, String> + Send + Sync;

#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    call: Arc<NativeFn>,
}

impl Function {
    pub fn new<F>(name: &str, call: F) -> Self
    where
        F: Fn(&[Value], &Scope<'_>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            call: Arc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value], scope: &Scope<'_>) -> std::result::Result<Value, String> {
        (self.call)(args, scope)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    Function(Function),
}

/// Caller supplied context for a render
#[derive(Debug, Clone, Default)]
pub struct Context {
    bindings: BTreeMap<String, Binding>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert_value(name, value);
        self
    }

    pub fn with_function(mut self, function: Function) -> Self {
        self.insert_function(function);
        self
    }

    pub fn insert_value(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), Binding::Value(value));
    }

    pub fn insert_function(&mut self, function: Function) {
        self.bindings
            .insert(function.name().to_string(), Binding::Function(function));
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Value binding only (functions yield `None`)
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.bindings.get(name) {
            Some(Binding::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        let bindings = map
            .into_iter()
            .map(|(k, v)| (k, Binding::Value(v)))
            .collect();
        Self { bindings }
    }
}

/// One frame of the lookup chain
pub struct Scope<'a> {
    vars: HashMap<String, Binding>,
    parent: Option<&'a Scope<'a>>,
}

impl Scope<'static> {
    pub fn root(vars: HashMap<String, Binding>) -> Self {
        Self { vars, parent: None }
    }
}

impl<'a> Scope<'a> {
    /// Empty frame on top of `self`
    pub fn child(&'a self) -> Scope<'a> {
        Scope {
            vars: HashMap::new(),
            parent: Some(self),
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        self.vars.insert(name.into(), binding);
    }

    pub fn bind_value(&mut self, name: impl Into<String>, value: Value) {
        self.bind(name, Binding::Value(value));
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        match self.vars.get(name) {
            Some(binding) => Some(binding),
            None => self.parent.and_then(|p| p.lookup(name)),
        }
    }
}
