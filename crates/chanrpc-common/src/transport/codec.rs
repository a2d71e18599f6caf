use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::protocol::error::{ChanrpcError, Result};

/// Transport-native message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured value, for channels that move JSON values directly
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

/// Which kind of envelope is being encoded or decoded, when the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Legacy single-pair serializer.
pub trait Serializer: Send + Sync {
    fn serialization(&self, value: Value) -> Result<Payload>;
    fn deserialization(&self, payload: Payload) -> Result<Value>;
}

/// Encoder with optional request/response-specific overrides.
///
/// The direction-specific methods default to [`Encoder::encode`] /
/// [`Encoder::decode`] and are preferred whenever a direction is known.
pub trait Encoder: Send + Sync {
    fn encode(&self, value: Value) -> Result<Payload>;
    fn decode(&self, payload: Payload) -> Result<Value>;

    fn encode_request(&self, value: Value) -> Result<Payload> {
        self.encode(value)
    }

    fn encode_response(&self, value: Value) -> Result<Payload> {
        self.encode(value)
    }

    fn decode_request(&self, payload: Payload) -> Result<Value> {
        self.decode(payload)
    }

    fn decode_response(&self, payload: Payload) -> Result<Value> {
        self.decode(payload)
    }
}

/// Codec for converting envelopes to and from channel payloads
///
/// Wraps either a [`Serializer`] or an [`Encoder`]; the engine never sees
/// which one it is talking to.
///
/// # Example
///
/// ```
/// use chanrpc_common::transport::{Codec, JsonSerialization, Payload};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let codec = Codec::Serializer(Arc::new(JsonSerialization));
/// let encoded = codec.encode(json!({"n": 42}), None).unwrap();
/// assert_eq!(encoded, Payload::Text("{\"n\":42}".into()));
///
/// let decoded = codec.decode(encoded, None).unwrap();
/// assert_eq!(decoded, json!({"n": 42}));
/// ```
#[derive(Clone)]
pub enum Codec {
    Serializer(Arc<dyn Serializer>),
    Encoder(Arc<dyn Encoder>),
}

impl Codec {
    /// Create the default codec (no serialization, payloads stay JSON values)
    pub fn new() -> Self {
        Codec::Serializer(Arc::new(NoSerialization))
    }

    /// Encode an envelope
    ///
    /// # Arguments
    ///
    /// * `value` - The envelope (or batch array) to encode
    /// * `direction` - Whether it is a request or a response, if known
    pub fn encode(&self, value: Value, direction: Option<Direction>) -> Result<Payload> {
        match self {
            Codec::Serializer(s) => s.serialization(value),
            Codec::Encoder(e) => match direction {
                Some(Direction::Request) => e.encode_request(value),
                Some(Direction::Response) => e.encode_response(value),
                None => e.encode(value),
            },
        }
    }

    /// Decode a payload
    ///
    /// # Arguments
    ///
    /// * `payload` - The payload received from the channel
    /// * `direction` - Whether the channel says it is a request or a response
    pub fn decode(&self, payload: Payload, direction: Option<Direction>) -> Result<Value> {
        match self {
            Codec::Serializer(s) => s.deserialization(payload),
            Codec::Encoder(e) => match direction {
                Some(Direction::Request) => e.decode_request(payload),
                Some(Direction::Response) => e.decode_response(payload),
                None => e.decode(payload),
            },
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Serializer(_) => f.write_str("Codec::Serializer"),
            Codec::Encoder(_) => f.write_str("Codec::Encoder"),
        }
    }
}

/// Identity serializer: values travel as [`Payload::Json`].
///
/// Text and binary payloads are passed through as a JSON string and a JSON
/// array of bytes respectively, so they fail envelope validation instead of
/// failing to decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSerialization;

impl Serializer for NoSerialization {
    fn serialization(&self, value: Value) -> Result<Payload> {
        Ok(Payload::Json(value))
    }

    fn deserialization(&self, payload: Payload) -> Result<Value> {
        Ok(match payload {
            Payload::Json(value) => value,
            Payload::Text(text) => Value::String(text),
            Payload::Binary(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
        })
    }
}

/// JSON text serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerialization;

impl Serializer for JsonSerialization {
    fn serialization(&self, value: Value) -> Result<Payload> {
        Ok(Payload::Text(serde_json::to_string(&value)?))
    }

    fn deserialization(&self, payload: Payload) -> Result<Value> {
        match payload {
            Payload::Text(text) => Ok(serde_json::from_str(&text)?),
            Payload::Binary(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Payload::Json(value) => Ok(value),
        }
    }
}

/// JSON bytes encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, value: Value) -> Result<Payload> {
        Ok(Payload::Binary(serde_json::to_vec(&value)?))
    }

    fn decode(&self, payload: Payload) -> Result<Value> {
        match payload {
            Payload::Binary(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Payload::Text(text) => Ok(serde_json::from_str(&text)?),
            Payload::Json(_) => Err(ChanrpcError::InvalidPayload(
                "JsonEncoder expects binary payloads".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Tagging;

    impl Encoder for Tagging {
        fn encode(&self, value: Value) -> Result<Payload> {
            Ok(Payload::Json(value))
        }

        fn decode(&self, payload: Payload) -> Result<Value> {
            NoSerialization.deserialization(payload)
        }

        fn encode_request(&self, value: Value) -> Result<Payload> {
            Ok(Payload::Json(json!({"req": value})))
        }
    }

    #[test]
    fn test_default_codec_is_identity() {
        let codec = Codec::new();
        let encoded = codec.encode(json!([1, 2]), None).unwrap();
        assert_eq!(encoded, Payload::Json(json!([1, 2])));
        assert_eq!(codec.decode(encoded, None).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_identity_passes_noise_through() {
        let codec = Codec::new();
        assert_eq!(codec.decode(Payload::Text("hi".into()), None).unwrap(), json!("hi"));
    }

    #[test]
    fn test_encoder_prefers_direction_hooks() {
        let codec = Codec::Encoder(Arc::new(Tagging));
        assert_eq!(
            codec.encode(json!(1), Some(Direction::Request)).unwrap(),
            Payload::Json(json!({"req": 1}))
        );
        assert_eq!(
            codec.encode(json!(1), Some(Direction::Response)).unwrap(),
            Payload::Json(json!(1))
        );
        assert_eq!(codec.encode(json!(1), None).unwrap(), Payload::Json(json!(1)));
    }

    #[test]
    fn test_json_serialization_parse_failure() {
        let codec = Codec::Serializer(Arc::new(JsonSerialization));
        assert!(codec.decode(Payload::Text("{not json".into()), None).is_err());
    }

    #[test]
    fn test_json_encoder_round_trip() {
        let codec = Codec::Encoder(Arc::new(JsonEncoder));
        let value = json!({"nested": {"array": [1, 2, 3, "four", null], "flag": true}});
        let encoded = codec.encode(value.clone(), Some(Direction::Response)).unwrap();
        assert!(matches!(encoded, Payload::Binary(_)));
        assert_eq!(codec.decode(encoded, Some(Direction::Response)).unwrap(), value);
    }
}
