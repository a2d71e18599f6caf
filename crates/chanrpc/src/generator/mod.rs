//! Generator remoting.
//!
//! A generator registered on a [`Service`](crate::Service) can be driven from
//! the peer as if it were local. The host keeps live iterators under string
//! ids and the caller drives them through four internal methods in the
//! reserved namespace:
//!
//! - `rpc.async-iterator.start` `[method, args]` returns a fresh iterator id
//! - `rpc.async-iterator.next` `[id, value]`
//! - `rpc.async-iterator.return` `[id, value]`
//! - `rpc.async-iterator.throw` `[id, value]`
//!
//! The last three return the iterator's `{done, value}` step.

mod client;
mod host;
mod iterator;

pub use client::{RemoteGenerator, RemoteIter};
pub(crate) use host::IteratorHost;
pub use iterator::{IterResult, RemoteIterator, StreamIterator};
