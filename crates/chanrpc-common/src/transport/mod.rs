//! chanrpc Transport Boundary
//!
//! This module defines what the engine needs from the outside world to move
//! envelopes: a codec and a channel. Concrete socket/worker adapters live
//! outside this workspace and only have to implement one of the channel traits.
//!
//! # Architecture
//!
//! - **Codec**: converts envelopes (`serde_json::Value`) to transport-native
//!   [`Payload`]s and back. Either a legacy [`Serializer`] or a richer
//!   [`Encoder`] with request/response-specific hooks
//! - **Event channel**: push-registration of a listener plus fire-and-forget send
//! - **Callback channel**: a setup hook that receives a request handler and a
//!   payload-validity predicate (the shape of an HTTP server endpoint)
//!
//! # Components
//!
//! - **[`Codec`]** / **[`NoSerialization`]** / **[`JsonSerialization`]** / **[`JsonEncoder`]**
//! - **[`EventChannel`]** / **[`CallbackChannel`]** / **[`Channel`]**
//! - **[`memory`]**: in-memory channel pairs for tests and demos
//!
//! # Example
//!
//! ```
//! use chanrpc_common::transport::{Codec, Direction, Payload};
//! use serde_json::json;
//!
//! let codec = Codec::new();
//! let payload = codec.encode(json!({"jsonrpc": "2.0", "method": "ping"}), Some(Direction::Request)).unwrap();
//! assert!(matches!(payload, Payload::Json(_)));
//! ```

pub mod channel;
pub mod codec;
pub mod memory;

pub use channel::{
    CallbackChannel, Channel, EventChannel, Listener, PayloadValidator, RequestHandler,
    Unsubscribe,
};
pub use codec::{
    Codec, Direction, Encoder, JsonEncoder, JsonSerialization, NoSerialization, Payload,
    Serializer,
};
