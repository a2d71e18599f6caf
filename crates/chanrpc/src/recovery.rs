//! Error mapping and recovery across the channel.
//!
//! Outbound, a [`ServiceError`] thrown by a local method is turned into a wire
//! [`ErrorObject`] by an [`ErrorMapper`]. Inbound, [`recover_error`] rebuilds a
//! [`ServiceError`] with the same kind from whatever the peer sent, gluing the
//! remote stack to the caller's own.
//!
//! Recovery never fails: a descriptor it cannot make sense of degrades to a
//! plain `Error` that keeps all the raw fields as text.

use chanrpc_common::{ErrorData, ErrorKind, ErrorObject, Request, ServiceError};
use serde_json::Value;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;

/// Maps a local failure to the error object sent back to the caller.
pub type ErrorMapper = Arc<dyn Fn(&ServiceError, &Request) -> ErrorObject + Send + Sync>;

/// Frame placed between the remote and local halves of a recovered stack.
///
/// The zero-width space keeps stack-trimming tools from taking it for a real frame.
pub const STACK_SEPARATOR: &str = "    at \u{200B}AsyncCall (rpc-boundary)";

/// Builds the default mapper.
///
/// # Arguments
///
/// * `send_local_stack` - include the error's stack in `data.stack`
pub fn default_error_mapper(send_local_stack: bool) -> ErrorMapper {
    Arc::new(move |err, _request| map_error(err, send_local_stack))
}

/// Describes `err` as a wire error object: code `-1` unless the error
/// carries one, `data.type` from its kind.
pub fn map_error(err: &ServiceError, send_local_stack: bool) -> ErrorObject {
    let data = ErrorData {
        kind: Some(err.kind.type_name().into_owned()),
        stack: err.stack.clone().filter(|_| send_local_stack),
    };
    ErrorObject {
        code: err.code.unwrap_or(-1),
        message: err.message.clone(),
        data: serde_json::to_value(data).ok(),
    }
}

/// Rebuilds the caller-facing error from a wire error object.
///
/// # Arguments
///
/// * `error` - The error object received from the peer
/// * `local_stack` - The caller stack captured when the call was issued
pub fn recover_error(error: &ErrorObject, local_stack: Option<&str>) -> ServiceError {
    let data = match &error.data {
        Some(value @ Value::Object(_)) => match serde_json::from_value::<ErrorData>(value.clone()) {
            Ok(data) => data,
            Err(_) => return last_resort(error),
        },
        _ => ErrorData::default(),
    };

    let kind = ErrorKind::from_type_name(data.kind.as_deref().unwrap_or("Error"));
    let mut recovered = ServiceError::new(kind, error.message.clone()).with_code(error.code);
    recovered.stack = compose_stack(data.stack.as_deref(), local_stack);
    recovered
}

fn last_resort(error: &ErrorObject) -> ServiceError {
    let data = error
        .data
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_default();
    ServiceError::error(format!("E{}: {}\n{}", error.code, error.message, data)).with_code(error.code)
}

/// Joins the remote and local halves of a stack.
pub fn compose_stack(remote: Option<&str>, local: Option<&str>) -> Option<String> {
    match (remote, local) {
        (None, None) => None,
        (Some(remote), None) => Some(remote.to_string()),
        (None, Some(local)) => Some(format!("{}\n{}", STACK_SEPARATOR, local)),
        (Some(remote), Some(local)) => Some(format!("{}\n{}\n{}", remote, STACK_SEPARATOR, local)),
    }
}

/// Captures the current stack. Without `force` this only happens when
/// backtraces are enabled for the process.
pub fn capture_stack(force: bool) -> Option<String> {
    let backtrace = if force {
        Backtrace::force_capture()
    } else {
        Backtrace::capture()
    };
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanrpc_common::{Params, DOM_EXCEPTION_TAG};
    use serde_json::json;

    fn request() -> Request {
        Request::new(None, "m", Params::default(), None)
    }

    #[test]
    fn test_default_mapper_shape() {
        let mapper = default_error_mapper(false);
        let err = ServiceError::range_error("out of range").with_stack("at f");
        let object = mapper(&err, &request());

        assert_eq!(object.code, -1);
        assert_eq!(object.message, "out of range");
        assert_eq!(object.data, Some(json!({"type": "RangeError"})));
    }

    #[test]
    fn test_default_mapper_sends_stack_when_enabled() {
        let object = map_error(&ServiceError::error("x").with_code(12).with_stack("at f"), true);
        assert_eq!(object.code, 12);
        assert_eq!(object.data, Some(json!({"type": "Error", "stack": "at f"})));
    }

    #[test]
    fn test_recover_builtin_kind() {
        let object = ErrorObject::new(-1.0, "bad", Some(json!({"type": "TypeError", "stack": "remote"})));
        let err = recover_error(&object, Some("local"));

        assert_eq!(err.kind, ErrorKind::TypeError);
        assert_eq!(err.message, "bad");
        assert_eq!(err.code, Some(-1));
        let stack = err.stack.unwrap();
        assert!(stack.starts_with("remote\n"));
        assert!(stack.contains('\u{200B}'));
        assert!(stack.ends_with("\nlocal"));
    }

    #[test]
    fn test_recover_dom_exception() {
        let tag = format!("{}AbortError", DOM_EXCEPTION_TAG);
        let object = ErrorObject::new(-1.0, "aborted", Some(json!({ "type": tag })));
        assert_eq!(
            recover_error(&object, None).kind,
            ErrorKind::DomException("AbortError".into())
        );
    }

    #[test]
    fn test_recover_custom_kind_and_missing_data() {
        let object = ErrorObject::new(5.0, "nope", Some(json!({"type": "QuotaExceeded"})));
        assert_eq!(recover_error(&object, None).kind, ErrorKind::Custom("QuotaExceeded".into()));

        let bare = ErrorObject::new(5.0, "nope", Some(json!("just text")));
        let err = recover_error(&bare, None);
        assert_eq!(err.kind, ErrorKind::Error);
        assert!(err.stack.is_none());
    }

    #[test]
    fn test_malformed_data_degrades_to_plain_error() {
        let object = ErrorObject::new(3.0, "weird", Some(json!({"type": 42})));
        let err = recover_error(&object, None);

        assert_eq!(err.kind, ErrorKind::Error);
        assert_eq!(err.code, Some(3));
        assert!(err.message.contains("weird"));
        assert!(err.message.contains("42"));
    }
}
