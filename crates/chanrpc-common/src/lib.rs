//! chanrpc Common Types and Transport Contracts
//!
//! This crate provides the wire protocol definitions and the channel/codec
//! boundary for the chanrpc call correlation engine.
//!
//! # Overview
//!
//! chanrpc turns a local service into something callable over an arbitrary
//! message channel and, at the same time, exposes the remote side's methods as
//! local stubs. This crate holds everything both sides agree on:
//!
//! - **Protocol Layer**: JSON-RPC 2.0 envelopes, identifiers, parameters,
//!   reserved error codes and the reserved `rpc.` method namespace
//! - **Error Model**: [`ServiceError`], the wire-safe description of a thrown error
//! - **Transport Layer**: the [`Codec`] boundary and the two [`Channel`] shapes
//!   the engine consumes, plus an in-memory channel pair
//!
//! # Wire Format
//!
//! - **Envelope**: `{"jsonrpc": "2.0", "id"?, "method", "params"?}` for requests,
//!   `{"jsonrpc": "2.0", "id", "result"}` / `{"jsonrpc": "2.0", "id", "error"}`
//!   for responses
//! - **Batch**: a JSON array of envelopes
//! - **Payload**: whatever the codec produces ([`Payload::Json`] by default)
//!
//! # Example
//!
//! ```
//! use chanrpc_common::{Id, Params, Request, SuccessResponse};
//! use serde_json::json;
//!
//! let request = Request::new(Some(Id::Number(1.into())), "add", Params::Array(vec![json!(1), json!(3)]), None);
//! let response = SuccessResponse::new(request.id.clone(), json!(4));
//! assert_eq!(response.id, Some(Id::Number(1.into())));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::{
    Channel, Codec, Direction, Encoder, EventChannel, CallbackChannel, JsonEncoder,
    JsonSerialization, Listener, NoSerialization, Payload, PayloadValidator, RequestHandler,
    Serializer, Unsubscribe,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
