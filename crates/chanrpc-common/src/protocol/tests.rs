//! Integration tests for the protocol module
//!
//! These tests verify envelope construction, wire shape, and classification
//! of decoded traffic.

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::json;

    #[test]
    fn test_request_creation() {
        let req = Request::new(Some(Id::from("a1")), "test_method", Params::Array(vec![json!(42)]), None);
        assert_eq!(req.method, "test_method");
        assert_eq!(req.params, Params::Array(vec![json!(42)]));
        assert!(!req.is_notification());
        assert!(req.remote_stack.is_none());
    }

    #[test]
    fn test_success_response_wire_shape() {
        let res = SuccessResponse::new(Some(Id::Number(123.into())), json!({"result": "ok"}));
        let value = serde_json::to_value(Response::Success(res)).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 123, "result": {"result": "ok"}}));
    }

    #[test]
    fn test_error_response_wire_shape() {
        let res = ErrorResponse::new(
            Some(Id::Number(456.into())),
            -1.0,
            "something failed",
            Some(json!({"type": "TypeError"})),
        );
        let value = serde_json::to_value(Response::Error(res)).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 456,
                "error": {"code": -1, "message": "something failed", "data": {"type": "TypeError"}}
            })
        );
    }

    #[test]
    fn test_request_round_trip_through_classification() {
        let req = Request::new(
            Some(Id::Number(1.into())),
            "compute",
            Params::from_value(json!({"x": 1})).unwrap(),
            Some("at caller".into()),
        );
        let value = serde_json::to_value(&req).unwrap();
        match Incoming::classify(value) {
            Incoming::Single(Message::Request(decoded)) => assert_eq!(decoded, req),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_null_id_request_is_notification() {
        let incoming = Incoming::classify(json!({"jsonrpc": "2.0", "id": null, "method": "tick"}));
        match incoming {
            Incoming::Single(Message::Request(req)) => assert!(req.is_notification()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_data_parses_type_and_stack() {
        let data: ErrorData = serde_json::from_value(json!({"type": "RangeError", "stack": "s"})).unwrap();
        assert_eq!(data.kind.as_deref(), Some("RangeError"));
        assert_eq!(data.stack.as_deref(), Some("s"));
    }

    #[test]
    fn test_reserved_prefix() {
        assert!(is_reserved("rpc.anything"));
        assert!(!is_reserved("rpcish"));
        assert_eq!(RESERVED_PREFIX, "rpc.");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorObject::parse_error().code, PARSE_ERROR);
        assert_eq!(ErrorObject::invalid_request().code, INVALID_REQUEST);
        assert_eq!(ErrorObject::method_not_found().code, METHOD_NOT_FOUND);
        assert_eq!(ErrorObject::internal_error("x").code, INTERNAL_ERROR);
        assert_eq!(ErrorObject::method_not_found().message, "Method not found");
    }
}
