//! json-e error type
//!
//! Every failure carries a kind, a message, and the location inside the
//! template where it happened. Locations are built bottom-up: each array or
//! object level the error travels through prepends its own segment, so the
//! final text reads `InterpreterError at template.tasks[8].payload: ...`.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TemplateError>;

/// Which stage of json-e rejected the template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expression could not be tokenized or parsed
    Syntax,
    /// Expression parsed but could not be evaluated
    Interpreter,
    /// Template structure is invalid (bad operator usage)
    Template,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Interpreter => "InterpreterError",
            ErrorKind::Template => "TemplateError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at template{location}: {message}")]
pub struct TemplateError {
    pub kind: ErrorKind,
    pub message: String,
    location: String,
}

impl TemplateError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: String::new(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn interpreter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interpreter, message)
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Template, message)
    }

    /// Full location, rooted at `template` (e.g. `template.tasks[8]`)
    pub fn location(&self) -> String {
        format!("template{}", self.location)
    }

    /// Prepend a path segment such as `[3]` or `.payload`
    pub(crate) fn within(mut self, segment: &str) -> Self {
        self.location.insert_str(0, segment);
        self
    }
}
