//! JSON-RPC 2.0 Envelopes
//!
//! This module implements the message shapes exchanged by chanrpc peers.
//!
//! # JSON-RPC 2.0 Compliance
//!
//! - JSON-RPC version: "2.0"
//! - Request format: `{"jsonrpc": "2.0", "id"?: ..., "method": "...", "params"?: ..., "remoteStack"?: "..."}`
//! - Success format: `{"jsonrpc": "2.0", "id": ..., "result": ...}`
//! - Error format: `{"jsonrpc": "2.0", "id": ..., "error": {"code": ..., "message": "...", "data"?: ...}}`
//!
//! A request without an `id` is a notification and never gets a reply.
//! `remoteStack` is a chanrpc extension carrying the caller's stack when the
//! caller opted into sending it.
//!
//! # Error Codes
//!
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32603`: Internal error
//!
//! Application errors default to `-1`.
//!
//! # Reserved Methods
//!
//! Method names starting with `rpc.` belong to the engine itself. They are
//! parsed into [`InternalMethod`] instead of being looked up on the local
//! service, so user methods can never collide with them.
//!
//! # Example
//!
//! ```
//! use chanrpc_common::protocol::envelope::{Incoming, Message};
//! use serde_json::json;
//!
//! let incoming = Incoming::classify(json!({"jsonrpc": "2.0", "id": 1, "method": "add", "params": [1, 3]}));
//! assert!(matches!(incoming, Incoming::Single(Message::Request(_))));
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::{Id, Params};

/// Protocol version marker carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC 2.0 error codes
/// Invalid JSON was received
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid envelope
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist / is not callable
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Internal JSON-RPC error
pub const INTERNAL_ERROR: i64 = -32603;

/// Prefix of the method names reserved for the engine.
pub const RESERVED_PREFIX: &str = "rpc.";

/// Returns true when `method` lives in the reserved namespace.
pub fn is_reserved(method: &str) -> bool {
    method.starts_with(RESERVED_PREFIX)
}

/// The `"jsonrpc": "2.0"` tag. Deserialization rejects any other version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(Version)
        } else {
            Err(de::Error::custom(format!("unsupported jsonrpc version '{}'", version)))
        }
    }
}

/// JSON-RPC request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: Version,
    /// Absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub method: String,
    #[serde(default)]
    pub params: Params,
    /// Caller stack, only sent when the caller enabled it
    #[serde(rename = "remoteStack", default, skip_serializing_if = "Option::is_none")]
    pub remote_stack: Option<String>,
}

impl Request {
    /// Builds a request. An empty `stack` is dropped.
    pub fn new(
        id: Option<Id>,
        method: impl Into<String>,
        params: Params,
        stack: Option<String>,
    ) -> Self {
        Self {
            jsonrpc: Version,
            id,
            method: method.into(),
            params,
            remote_stack: stack.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC error object.
///
/// The code is always an integer: fractional codes are floored and
/// non-numeric or NaN codes become `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default = "unknown_code", deserialize_with = "deserialize_code")]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn unknown_code() -> i64 {
    -1
}

/// Floors a numeric error code; NaN becomes `-1`.
pub fn normalize_code(code: f64) -> i64 {
    if code.is_nan() {
        -1
    } else {
        code.floor() as i64
    }
}

fn deserialize_code<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value.as_i64() {
        Some(code) => code,
        None => value.as_f64().map(normalize_code).unwrap_or(-1),
    })
}

impl ErrorObject {
    pub fn new(code: f64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code: normalize_code(code),
            message: message.into(),
            data,
        }
    }

    /// Create a parse error (-32700)
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR as f64, "Parse error", None)
    }

    /// Create an invalid request error (-32600)
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST as f64, "Invalid Request", None)
    }

    /// Create a method not found error (-32601)
    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND as f64, "Method not found", None)
    }

    /// Create an internal error (-32603)
    pub fn internal_error(msg: &str) -> Self {
        Self::new(INTERNAL_ERROR as f64, msg, None)
    }
}

/// Successful reply. Only built for requests that carried an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub jsonrpc: Version,
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub result: Value,
}

impl SuccessResponse {
    pub fn new(id: Option<Id>, result: Value) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result,
        }
    }
}

/// Error reply. `id` is `null` when it could not be determined, e.g. after a
/// parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub jsonrpc: Version,
    #[serde(default)]
    pub id: Option<Id>,
    pub error: ErrorObject,
}

impl ErrorResponse {
    pub fn new(id: Option<Id>, code: f64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::from_object(id, ErrorObject::new(code, message, data))
    }

    pub fn from_object(id: Option<Id>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: Version,
            id,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success(SuccessResponse),
    Error(ErrorResponse),
}

impl Response {
    pub fn id(&self) -> Option<&Id> {
        match self {
            Response::Success(r) => r.id.as_ref(),
            Response::Error(r) => r.id.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// A payload that failed envelope validation. Keeps the id when one could be
/// read so the invalid-request reply can still be correlated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Invalid {
    pub id: Option<Id>,
}

/// Checks whether `value` is protocol traffic rather than channel noise.
///
/// True iff `value` is an object tagged `"jsonrpc": "2.0"` whose `params`,
/// when present, is an array or an object.
pub fn is_envelope(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return false;
    }
    match obj.get("params") {
        None => true,
        Some(params) => params.is_array() || params.is_object(),
    }
}

impl Message {
    /// Validates and classifies a single decoded value.
    pub fn from_value(value: Value) -> std::result::Result<Self, Invalid> {
        if !is_envelope(&value) {
            return Err(Invalid {
                id: value.get("id").and_then(|id| Id::deserialize(id).ok()),
            });
        }

        let (is_request, is_error, is_success) = match value.as_object() {
            Some(obj) => (
                obj.contains_key("method"),
                obj.contains_key("error"),
                obj.contains_key("result"),
            ),
            None => (false, false, false),
        };
        let id = value.get("id").and_then(|id| Id::deserialize(id).ok());
        let invalid = || Invalid { id: id.clone() };

        if is_request {
            serde_json::from_value(value)
                .map(Message::Request)
                .map_err(|_| invalid())
        } else if is_error {
            serde_json::from_value(value)
                .map(|r| Message::Response(Response::Error(r)))
                .map_err(|_| invalid())
        } else if is_success {
            serde_json::from_value(value)
                .map(|r| Message::Response(Response::Success(r)))
                .map_err(|_| invalid())
        } else {
            Err(invalid())
        }
    }
}

/// Inbound traffic after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Single(Message),
    Batch(Vec<std::result::Result<Message, Invalid>>),
    Invalid(Invalid),
}

impl Incoming {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Array(items) if items.is_empty() => Incoming::Invalid(Invalid::default()),
            Value::Array(items) => {
                Incoming::Batch(items.into_iter().map(Message::from_value).collect())
            }
            other => match Message::from_value(other) {
                Ok(message) => Incoming::Single(message),
                Err(invalid) => Incoming::Invalid(invalid),
            },
        }
    }
}

/// Engine-owned methods in the reserved namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalMethod {
    IteratorStart,
    IteratorNext,
    IteratorReturn,
    IteratorThrow,
}

impl InternalMethod {
    pub const ALL: [InternalMethod; 4] = [
        InternalMethod::IteratorStart,
        InternalMethod::IteratorNext,
        InternalMethod::IteratorReturn,
        InternalMethod::IteratorThrow,
    ];

    pub const fn wire_name(self) -> &'static str {
        match self {
            InternalMethod::IteratorStart => "rpc.async-iterator.start",
            InternalMethod::IteratorNext => "rpc.async-iterator.next",
            InternalMethod::IteratorReturn => "rpc.async-iterator.return",
            InternalMethod::IteratorThrow => "rpc.async-iterator.throw",
        }
    }

    /// Name of the iterator operation, used in error messages.
    pub const fn operation(self) -> &'static str {
        match self {
            InternalMethod::IteratorStart => "start",
            InternalMethod::IteratorNext => "next",
            InternalMethod::IteratorReturn => "return",
            InternalMethod::IteratorThrow => "throw",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.wire_name() == method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_absent_id_and_stack() {
        let req = Request::new(None, "ping", Params::default(), Some(String::new()));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "method": "ping", "params": []}));
    }

    #[test]
    fn test_request_carries_remote_stack() {
        let req = Request::new(Some(Id::Number(1.into())), "ping", Params::default(), Some("at main".into()));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["remoteStack"], "at main");
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn test_error_response_serializes_null_id() {
        let res = ErrorResponse::from_object(None, ErrorObject::parse_error());
        let value = serde_json::to_value(Response::Error(res)).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], -32700);
        assert!(value["error"].get("data").is_none());
    }

    #[test]
    fn test_error_codes_are_floored() {
        assert_eq!(ErrorObject::new(-1.5, "x", None).code, -2);
        assert_eq!(ErrorObject::new(f64::NAN, "x", None).code, -1);
        assert_eq!(ErrorObject::new(12.9, "x", None).code, 12);
    }

    #[test]
    fn test_inbound_fractional_code_is_floored() {
        let incoming = Incoming::classify(json!({
            "jsonrpc": "2.0", "id": 3, "error": {"code": 4.7, "message": "m"}
        }));
        match incoming {
            Incoming::Single(Message::Response(Response::Error(e))) => assert_eq!(e.error.code, 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_is_envelope() {
        assert!(is_envelope(&json!({"jsonrpc": "2.0", "method": "a"})));
        assert!(is_envelope(&json!({"jsonrpc": "2.0", "method": "a", "params": {"k": 1}})));
        assert!(!is_envelope(&json!({"jsonrpc": "2.0", "method": "a", "params": 5})));
        assert!(!is_envelope(&json!({"jsonrpc": "1.0", "method": "a"})));
        assert!(!is_envelope(&json!(null)));
        assert!(!is_envelope(&json!("hello")));
    }

    #[test]
    fn test_classify_request_and_responses() {
        assert!(matches!(
            Incoming::classify(json!({"jsonrpc": "2.0", "method": "a", "params": []})),
            Incoming::Single(Message::Request(r)) if r.is_notification()
        ));
        assert!(matches!(
            Incoming::classify(json!({"jsonrpc": "2.0", "id": "x", "result": null})),
            Incoming::Single(Message::Response(Response::Success(_)))
        ));
        assert!(matches!(
            Incoming::classify(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -1, "message": "e"}})),
            Incoming::Single(Message::Response(Response::Error(_)))
        ));
    }

    #[test]
    fn test_classify_invalid_keeps_id() {
        let incoming = Incoming::classify(json!({"jsonrpc": "2.0", "id": 9, "method": 42}));
        assert_eq!(incoming, Incoming::Invalid(Invalid { id: Some(Id::Number(9.into())) }));
    }

    #[test]
    fn test_classify_batch() {
        let incoming = Incoming::classify(json!([
            {"jsonrpc": "2.0", "id": 1, "method": "a"},
            "noise"
        ]));
        match incoming {
            Incoming::Batch(items) => {
                assert!(items[0].is_ok());
                assert!(items[1].is_err());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(Incoming::classify(json!([])), Incoming::Invalid(Invalid::default()));
    }

    #[test]
    fn test_internal_method_names() {
        for method in InternalMethod::ALL {
            assert!(is_reserved(method.wire_name()));
            assert_eq!(InternalMethod::parse(method.wire_name()), Some(method));
        }
        assert_eq!(InternalMethod::parse("rpc.unknown"), None);
        assert_eq!(InternalMethod::IteratorThrow.operation(), "throw");
    }
}
