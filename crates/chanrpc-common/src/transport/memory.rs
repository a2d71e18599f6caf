//! In-memory channels
//!
//! Connected channel pairs living in one process. They are what the engine's
//! tests and the loopback demo run on, and they double as reference
//! implementations of the two channel shapes.
//!
//! # Example
//!
//! ```
//! use chanrpc_common::transport::memory;
//! use chanrpc_common::transport::{EventChannel, Payload};
//! use std::sync::{Arc, Mutex};
//!
//! # tokio_test_block(async {
//! let (left, right) = memory::pair();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! right.on(Arc::new(move |payload| sink.lock().unwrap().push(payload)));
//!
//! left.send(Payload::Text("hello".into())).await.unwrap();
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use futures_util::future::{self, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::channel::{
    CallbackChannel, EventChannel, Listener, PayloadValidator, RequestHandler, Unsubscribe,
};
use super::codec::Payload;
use crate::lock;
use crate::protocol::error::{ChanrpcError, Result};

/// Listener list of one endpoint.
#[derive(Default)]
struct Listeners {
    entries: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl Listeners {
    fn add(self: &Arc<Self>, listener: Listener) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, listener));

        let listeners = Arc::clone(self);
        Box::new(move || {
            lock(&listeners.entries).retain(|(entry, _)| *entry != id);
        })
    }

    fn deliver(&self, payload: Payload) {
        // Snapshot so a listener may unsubscribe or send while being called
        let snapshot: Vec<Listener> = lock(&self.entries)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(payload.clone());
        }
    }
}

struct Link {
    closed: AtomicBool,
}

/// One end of an in-memory event channel pair.
///
/// `send` delivers synchronously to every listener registered on the other end.
/// Clones share the same end.
#[derive(Clone)]
pub struct MemoryChannel {
    inbox: Arc<Listeners>,
    peer: Arc<Listeners>,
    link: Arc<Link>,
    sent: Arc<AtomicUsize>,
}

/// Creates two connected event channels.
pub fn pair() -> (MemoryChannel, MemoryChannel) {
    let left = Arc::new(Listeners::default());
    let right = Arc::new(Listeners::default());
    let link = Arc::new(Link {
        closed: AtomicBool::new(false),
    });

    (
        MemoryChannel {
            inbox: Arc::clone(&left),
            peer: Arc::clone(&right),
            link: Arc::clone(&link),
            sent: Arc::default(),
        },
        MemoryChannel {
            inbox: right,
            peer: left,
            link,
            sent: Arc::default(),
        },
    )
}

impl MemoryChannel {
    /// Number of payloads successfully sent from this end.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Breaks the link; every later send on either end fails.
    pub fn close(&self) {
        self.link.closed.store(true, Ordering::SeqCst);
    }
}

impl EventChannel for MemoryChannel {
    fn on(&self, listener: Listener) -> Option<Unsubscribe> {
        Some(self.inbox.add(listener))
    }

    fn send(&self, payload: Payload) -> BoxFuture<'static, Result<()>> {
        if self.link.closed.load(Ordering::SeqCst) {
            return future::ready(Err(ChanrpcError::Closed)).boxed();
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.peer.deliver(payload);
        future::ready(Ok(())).boxed()
    }
}

/// Shared state of a callback pair.
#[derive(Default)]
struct Endpoint {
    handler: Mutex<Option<(RequestHandler, PayloadValidator)>>,
    replies: Arc<Listeners>,
    sent: AtomicUsize,
}

/// Server end of a callback pair: a [`CallbackChannel`].
pub struct CallbackServer {
    endpoint: Arc<Endpoint>,
}

/// Client end of a callback pair: an [`EventChannel`] whose sends are handed
/// to the server's handler and whose listeners receive the handler's replies.
pub struct CallbackClient {
    endpoint: Arc<Endpoint>,
}

/// Creates a client/server pair modelled on a request/response endpoint.
pub fn callback_pair() -> (CallbackClient, CallbackServer) {
    let endpoint = Arc::new(Endpoint::default());
    (
        CallbackClient {
            endpoint: Arc::clone(&endpoint),
        },
        CallbackServer { endpoint },
    )
}

impl CallbackServer {
    pub fn is_installed(&self) -> bool {
        lock(&self.endpoint.handler).is_some()
    }
}

impl CallbackChannel for CallbackServer {
    fn setup(&self, handler: RequestHandler, is_valid: PayloadValidator) -> Option<Unsubscribe> {
        *lock(&self.endpoint.handler) = Some((handler, is_valid));

        let endpoint = Arc::clone(&self.endpoint);
        Some(Box::new(move || {
            lock(&endpoint.handler).take();
        }))
    }
}

impl CallbackClient {
    pub fn sent_count(&self) -> usize {
        self.endpoint.sent.load(Ordering::SeqCst)
    }
}

impl EventChannel for CallbackClient {
    fn on(&self, listener: Listener) -> Option<Unsubscribe> {
        Some(self.endpoint.replies.add(listener))
    }

    /// Invalid payloads are dropped without reaching the handler, the way an
    /// endpoint answers them with a bare transport-level rejection.
    fn send(&self, payload: Payload) -> BoxFuture<'static, Result<()>> {
        let installed = lock(&self.endpoint.handler).clone();
        let Some((handler, is_valid)) = installed else {
            return future::ready(Err(ChanrpcError::Closed)).boxed();
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => return future::ready(Err(ChanrpcError::Channel(e.to_string()))).boxed(),
        };

        self.endpoint.sent.fetch_add(1, Ordering::SeqCst);
        if !is_valid(&payload) {
            return future::ready(Ok(())).boxed();
        }

        let replies = Arc::clone(&self.endpoint.replies);
        runtime.spawn(async move {
            if let Some(reply) = handler(payload).await {
                replies.deliver(reply);
            }
        });
        future::ready(Ok(())).boxed()
    }
}
