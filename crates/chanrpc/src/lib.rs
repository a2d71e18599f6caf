//! chanrpc - call correlation over arbitrary message channels
//!
//! This crate turns a local [`Service`] into something callable from the
//! other end of a message channel and, symmetrically, exposes the peer's
//! methods as local stubs. It does not own a transport: anything that can
//! deliver JSON-RPC 2.0 envelopes in both directions (an in-process pair, a
//! socket, a worker port) plugs in through [`Channel`].
//!
//! # Architecture
//!
//! ```text
//! Caller ──> RemoteMethod ──> Engine ──> Codec ──> Channel ──> peer
//!                               ^                     │
//!                               └── PendingTable <────┘ (responses)
//! ```
//!
//! - **Engine**: pending table, id generation, inbound dispatch
//! - **Stubs**: [`RemoteMethod`], [`NotifyMethod`], [`BatchedMethod`], [`RemoteGenerator`]
//! - **Errors**: thrown errors cross the channel as [`ServiceError`] and come
//!   back out of stubs as [`RpcError::Service`]
//! - **Cancellation**: soft and forced [`AbortSignal`]s
//!
//! # Example
//!
//! ```
//! use chanrpc::{Engine, Service};
//! use chanrpc_common::transport::{memory, Channel};
//! use futures_util::StreamExt;
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (left, right) = memory::pair();
//! let _server = Engine::builder()
//!     .implementation(
//!         Service::builder()
//!             .stream("count", |_| futures_util::stream::iter((1..=3).map(|n| Ok::<_, chanrpc::ServiceError>(json!(n)))))
//!             .build(),
//!     )
//!     .channel(Channel::event(right))
//!     .build()
//!     .unwrap();
//! let client = Engine::builder().channel(Channel::event(left)).build().unwrap();
//!
//! let values: Vec<_> = client.generator("count").call(vec![]).into_stream().collect().await;
//! assert_eq!(values.len(), 3);
//! # });
//! ```

pub mod abort;
pub mod batch;
pub mod builder;
pub mod config;
mod dispatch;
pub mod engine;
pub mod error;
pub mod generator;
pub mod logging;
pub mod notify;
mod pending;
pub mod recovery;
pub mod service;
pub mod stub;

pub use abort::AbortSignal;
pub use batch::{Batch, BatchedMethod};
pub use builder::EngineBuilder;
pub use config::{EngineConfig, LogLevel, LogOptions, Strictness};
pub use engine::{Engine, IdGenerator};
pub use error::{Result, RpcError};
pub use generator::{IterResult, RemoteGenerator, RemoteIter, RemoteIterator, StreamIterator};
pub use logging::{LogEvent, Logger, NoopLogger, TracingLogger};
pub use notify::{Notifier, NotifyMethod};
pub use recovery::{default_error_mapper, recover_error, ErrorMapper};
pub use service::{GeneratorFactory, Lookup, MethodHandler, Reply, Service, ServiceBuilder};
pub use stub::RemoteMethod;

pub use chanrpc_common::transport::{Channel, Payload};
pub use chanrpc_common::{ErrorKind, Id, ParameterStructure, ServiceError};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
