//! Thrown-error model shared by both peers.
//!
//! A [`ServiceError`] is what a local method fails with and what a caller
//! receives back. Its [`ErrorKind`] survives the trip across the channel, so
//! callers can match on the kind of a remote failure the same way they would
//! on a local one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// Type tag prefix marking a DOMException-style error on the wire.
pub const DOM_EXCEPTION_TAG: &str = "DOMException:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
    /// A DOMException-style error carrying its `name` (e.g. `AbortError`).
    DomException(String),
    /// Any other named error type.
    Custom(String),
}

impl ErrorKind {
    /// Parses the wire `type` tag.
    pub fn from_type_name(name: &str) -> Self {
        if let Some(dom_name) = name.strip_prefix(DOM_EXCEPTION_TAG) {
            return ErrorKind::DomException(dom_name.to_string());
        }
        match name {
            "" | "Error" => ErrorKind::Error,
            "EvalError" => ErrorKind::EvalError,
            "RangeError" => ErrorKind::RangeError,
            "ReferenceError" => ErrorKind::ReferenceError,
            "SyntaxError" => ErrorKind::SyntaxError,
            "TypeError" => ErrorKind::TypeError,
            "URIError" => ErrorKind::UriError,
            other => ErrorKind::Custom(other.to_string()),
        }
    }

    /// The wire `type` tag.
    pub fn type_name(&self) -> Cow<'_, str> {
        match self {
            ErrorKind::DomException(name) => Cow::Owned(format!("{}{}", DOM_EXCEPTION_TAG, name)),
            other => Cow::Borrowed(other.name()),
        }
    }

    /// The name a caller sees, without the DOMException tag.
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::UriError => "URIError",
            ErrorKind::DomException(name) | ErrorKind::Custom(name) => name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, ErrorKind::DomException(_) | ErrorKind::Custom(_))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
    /// Numeric code attached by the implementation or carried back from the wire.
    pub code: Option<i64>,
    pub stack: Option<String>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, message)
    }

    pub fn dom_exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DomException(name.into()), message)
    }

    /// The reason used by an abort signal aborted without one.
    pub fn abort_error() -> Self {
        Self::dom_exception("AbortError", "This operation was aborted")
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Converts an arbitrary thrown JSON value.
    ///
    /// Primitives become a plain `Error` with the value as message. Objects
    /// contribute their `message`, `name` and `stack` members when those are
    /// strings.
    pub fn from_thrown(value: Value) -> Self {
        match value {
            Value::String(message) => Self::error(message),
            Value::Object(obj) => {
                let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
                let kind = text("name")
                    .map(|name| ErrorKind::from_type_name(&name))
                    .unwrap_or(ErrorKind::Error);
                let mut err = Self::new(kind, text("message").unwrap_or_default());
                err.stack = text("stack");
                err
            }
            Value::Null => Self::error(""),
            other => Self::error(other.to_string()),
        }
    }

    /// Wraps any Rust error, using its type name as the error kind.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let base = full.split('<').next().unwrap_or(full);
        let short = base.rsplit("::").next().unwrap_or(base);
        Self::new(ErrorKind::from_type_name(short), err.to_string())
    }
}

impl From<&str> for ServiceError {
    fn from(message: &str) -> Self {
        Self::error(message)
    }
}

impl From<String> for ServiceError {
    fn from(message: String) -> Self {
        Self::error(message)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::type_error(err.to_string())
    }
}

/// The optional `data` member of a wire error object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}
