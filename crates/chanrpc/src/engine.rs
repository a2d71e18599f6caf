//! Correlation engine
//!
//! An [`Engine`] serves a local [`Service`] to its peer and, over the same
//! channel, lets the caller invoke the peer's methods through memoized stubs.
//!
//! # Architecture
//!
//! - **Outbound**: a stub call gets an id from the id generator, registers a
//!   pending entry and encodes the request. The caller then waits on a
//!   oneshot that the inbound side settles, handing the request to the
//!   channel while it waits, so a slow send never delays a rejection.
//! - **Inbound**: every payload the channel delivers is decoded, classified
//!   and either dispatched to the local service (requests) or routed to the
//!   waiting caller (responses). See `dispatch.rs`.
//! - **Cancellation**: the soft signal is checked when a call is issued; a
//!   background watcher rejects every pending call once the forced signal fires.
//!
//! The engine is a cheap handle: clones share one pending table and one
//! channel attachment. Dropping the last handle detaches from the channel and
//! rejects whatever is still pending with [`RpcError::Closed`].
//!
//! # Example
//!
//! ```
//! use chanrpc::{Engine, Service};
//! use chanrpc_common::transport::{memory, Channel};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (left, right) = memory::pair();
//! let _server = Engine::builder()
//!     .implementation(Service::builder().typed_method("add", |(a, b): (i64, i64)| async move { Ok(a + b) }).build())
//!     .channel(Channel::event(right))
//!     .build()
//!     .unwrap();
//! let client = Engine::builder().channel(Channel::event(left)).build().unwrap();
//!
//! let sum = client.method("add").call(vec![json!(1), json!(3)]).await.unwrap();
//! assert_eq!(sum, json!(4));
//! # });
//! ```

use chanrpc_common::transport::{
    Channel, Codec, Direction, Listener, Payload, PayloadValidator, RequestHandler, Unsubscribe,
};
use chanrpc_common::{is_reserved, Id, InternalMethod, Params, Request, ServiceError};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::abort::AbortSignal;
use crate::batch::Batch;
use crate::builder::EngineBuilder;
use crate::config::EngineConfig;
use crate::dispatch::catch_panic;
use crate::error::{Result, RpcError};
use crate::generator::{IteratorHost, RemoteGenerator};
use crate::lock;
use crate::logging::LogHooks;
use crate::notify::Notifier;
use crate::pending::{PendingCall, PendingGuard, PendingReply, PendingTable, SendFuture};
use crate::recovery::{capture_stack, ErrorMapper};
use crate::service::{Lookup, MethodHandler, Reply, Service};
use crate::stub::RemoteMethod;

pub(crate) type LocalService = Shared<BoxFuture<'static, std::result::Result<Arc<Service>, ServiceError>>>;
pub(crate) type SharedChannel = Shared<BoxFuture<'static, Channel>>;

/// Produces the id of each outbound call. Ids must be unique among the
/// calls pending at any one time.
pub type IdGenerator = Arc<dyn Fn() -> Id + Send + Sync>;

/// A call that has left the caller.
pub(crate) enum Issued {
    /// Answered without a round trip (local implementation preferred)
    Ready(Value),
    Waiting(PendingReply),
}

impl Issued {
    pub(crate) async fn settle(self) -> Result<Value> {
        match self {
            Issued::Ready(value) => Ok(value),
            Issued::Waiting(reply) => reply.wait().await,
        }
    }
}

/// Handle to a correlation engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) local: LocalService,
    pub(crate) channel: SharedChannel,
    pub(crate) codec: Codec,
    pub(crate) pending: Arc<PendingTable>,
    pub(crate) ids: IdGenerator,
    pub(crate) error_mapper: ErrorMapper,
    pub(crate) logs: LogHooks,
    pub(crate) signal: AbortSignal,
    pub(crate) force_signal: AbortSignal,
    pub(crate) iterators: IteratorHost,
    pub(crate) stubs: Mutex<HashMap<String, RemoteMethod>>,
    pub(crate) detach: Mutex<Vec<Unsubscribe>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) runtime: Handle,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Attaches a freshly built engine to its channel and starts the
    /// forced-abort watcher.
    pub(crate) fn start(inner: EngineInner) -> Self {
        let inner = Arc::new(inner);

        match inner.channel.clone().now_or_never() {
            Some(channel) => inner.attach(&channel),
            None => {
                let weak = Arc::downgrade(&inner);
                let channel = inner.channel.clone();
                let shutdown = inner.shutdown.clone();
                inner.runtime.spawn(async move {
                    tokio::select! {
                        resolved = channel => {
                            if let Some(inner) = weak.upgrade() {
                                inner.attach(&resolved);
                            }
                        }
                        _ = shutdown.cancelled() => {}
                    }
                });
            }
        }

        inner.watch_force_signal();
        Engine { inner }
    }

    /// Returns the stub for `name`.
    ///
    /// Stubs are memoized: asking twice for the same name yields the same stub.
    pub fn method(&self, name: &str) -> RemoteMethod {
        let mut stubs = lock(&self.inner.stubs);
        stubs
            .entry(name.to_string())
            .or_insert_with(|| RemoteMethod::new(Arc::downgrade(&self.inner), name))
            .clone()
    }

    /// Calls a remote method by name.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.inner.issue(name, args, None).await?.settle().await
    }

    /// A view of this engine whose calls are notifications.
    pub fn notify(&self) -> Notifier {
        Notifier::new(self.clone())
    }

    /// A new batch with its own queue.
    pub fn batch(&self) -> Batch {
        Batch::new(Arc::clone(&self.inner))
    }

    /// The stub for a remote generator.
    pub fn generator(&self, name: &str) -> RemoteGenerator {
        RemoteGenerator::new(Arc::downgrade(&self.inner), name)
    }

    /// Number of outbound calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.inner.signal
    }

    pub fn force_signal(&self) -> &AbortSignal {
        &self.inner.force_signal
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Feeds one inbound payload to the engine and returns the encoded reply.
    ///
    /// This is what the engine's own channel listeners run; hosts that own
    /// their receive loop can call it directly.
    ///
    /// # Arguments
    ///
    /// * `payload` - The payload as received from the transport
    /// * `direction` - Whether the transport knows this is a request or a response
    pub async fn handle_payload(&self, payload: Payload, direction: Option<Direction>) -> Option<Payload> {
        self.inner.handle_payload(payload, direction).await
    }

    /// Whether `payload` decodes to an envelope or a non-empty batch of them.
    pub fn is_valid_payload(&self, payload: &Payload) -> bool {
        self.inner.is_valid_payload(payload)
    }
}

impl EngineInner {
    pub(crate) fn throw_if_aborted(&self) -> Result<()> {
        self.force_signal
            .throw_if_aborted()
            .and_then(|_| self.signal.throw_if_aborted())
            .map_err(RpcError::Aborted)
    }

    /// The user-facing call path, up to the point where the call waits.
    ///
    /// The returned [`Issued`] does not keep the engine alive.
    pub(crate) async fn issue(
        self: &Arc<Self>,
        method: &str,
        args: Vec<Value>,
        signal: Option<AbortSignal>,
    ) -> Result<Issued> {
        self.throw_if_aborted()?;
        if let Some(signal) = &signal {
            signal.throw_if_aborted().map_err(RpcError::Aborted)?;
        }
        if is_reserved(method) {
            return Err(RpcError::ReservedMethod(method.to_string()));
        }

        if let Some(handler) = self.preferred_local(method) {
            tracing::debug!("calling local implementation of {}", method);
            return match catch_panic(handler(args)).await {
                Ok(Reply::Value(value)) => Ok(Issued::Ready(value)),
                Ok(Reply::NoResponse) => Ok(Issued::Ready(Value::Null)),
                Err(err) => Err(RpcError::Service(err)),
            };
        }

        let params = self.config.parameter_structure.apply(args);
        let reply = self.request(method, params)?;
        Ok(Issued::Waiting(reply.with_signal(signal)))
    }

    /// Calls one of the engine's own reserved methods.
    pub(crate) fn issue_internal(&self, method: InternalMethod, args: Vec<Value>) -> Result<PendingReply> {
        self.throw_if_aborted()?;
        self.request(method.wire_name(), Params::Array(args))
    }

    fn preferred_local(&self, method: &str) -> Option<MethodHandler> {
        if !self.config.prefer_local_implementation {
            return None;
        }
        match self.local.peek() {
            Some(Ok(service)) => match service.lookup(method) {
                Lookup::Found(handler) => Some(handler),
                Lookup::MethodNotFound | Lookup::NotCallable => None,
            },
            _ => None,
        }
    }

    /// Builds a request with a fresh id and registers its pending entry.
    ///
    /// Dropping the returned reply before it settles removes the entry.
    pub(crate) fn register_call(&self, method: &str, params: Params) -> Result<(Request, PendingReply)> {
        let stack = capture_stack(self.config.log.send_local_stack);
        let id = (self.ids)();
        let sent_stack = stack.clone().filter(|_| self.config.log.send_local_stack);
        let request = Request::new(Some(id.clone()), method, params, sent_stack);
        let replay = if self.config.log.request_replay {
            serde_json::to_value(&request).ok()
        } else {
            None
        };

        let (call, rx) = PendingCall::new(method, stack, replay);
        self.pending.insert(id.clone(), call);
        let reply = PendingReply::new(rx, PendingGuard::new(Arc::clone(&self.pending), id));

        // The forced signal may have fired between the entry check and the insert
        if let Some(reason) = self.force_signal.reason() {
            return Err(RpcError::Aborted(reason));
        }
        Ok((request, reply))
    }

    /// Registers a call. Its request goes out while the reply is awaited.
    fn request(&self, method: &str, params: Params) -> Result<PendingReply> {
        let (request, reply) = self.register_call(method, params)?;
        let value = serde_json::to_value(&request).map_err(|e| RpcError::Codec(e.to_string()))?;
        tracing::debug!("sending request {:?} for {}", request.id, method);

        Ok(reply.with_send(self.outbound(value, Direction::Request)?))
    }

    pub(crate) async fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
        self.throw_if_aborted()?;
        if is_reserved(method) {
            return Err(RpcError::ReservedMethod(method.to_string()));
        }

        let stack = if self.config.log.send_local_stack {
            capture_stack(true)
        } else {
            None
        };
        let request = Request::new(None, method, self.config.parameter_structure.apply(args), stack);
        let value = serde_json::to_value(&request).map_err(|e| RpcError::Codec(e.to_string()))?;
        self.send(value, Direction::Request).await
    }

    /// Encodes `value` and sends it through the channel.
    pub(crate) async fn send(&self, value: Value, direction: Direction) -> Result<()> {
        self.outbound(value, direction)?.await
    }

    /// Encodes `value` now; the returned future hands it to the channel.
    ///
    /// The future holds the channel but not the engine.
    pub(crate) fn outbound(&self, value: Value, direction: Direction) -> Result<SendFuture> {
        let payload = self.codec.encode(value, Some(direction))?;
        let channel = self.channel.clone();
        Ok(async move {
            let channel = channel.await;
            let sender = channel.sender().ok_or_else(|| {
                RpcError::Transport("channel has no event side to send outbound payloads".to_string())
            })?;
            sender.send(payload).await?;
            Ok::<(), RpcError>(())
        }
        .boxed())
    }

    fn attach(self: &Arc<Self>, channel: &Channel) {
        let mut hooks = Vec::new();

        if let Some(events) = channel.sender() {
            let weak = Arc::downgrade(self);
            let listener: Listener = Arc::new(move |payload| {
                if let Some(inner) = weak.upgrade() {
                    let runtime = inner.runtime.clone();
                    runtime.spawn(inner.receive(payload));
                }
            });
            hooks.extend(events.on(listener));
        }

        if let Some(callbacks) = channel.callbacks() {
            let weak = Arc::downgrade(self);
            let handler: RequestHandler = Arc::new(move |payload| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.handle_payload(payload, Some(Direction::Request)).await,
                        None => None,
                    }
                }
                .boxed()
            });
            let weak = Arc::downgrade(self);
            let is_valid: PayloadValidator = Arc::new(move |payload| {
                weak.upgrade()
                    .map(|inner| inner.is_valid_payload(payload))
                    .unwrap_or(false)
            });
            hooks.extend(callbacks.setup(handler, is_valid));
        }

        tracing::debug!("engine attached to {:?}", channel);
        lock(&self.detach).extend(hooks);
    }

    /// Handles a payload from the event side and sends the reply back.
    async fn receive(self: Arc<Self>, payload: Payload) {
        let Some(reply) = self.handle_payload(payload, None).await else {
            return;
        };
        let channel = self.channel.clone().await;
        if let Some(sender) = channel.sender() {
            if let Err(e) = sender.send(reply).await {
                tracing::warn!("failed to send reply: {}", e);
            }
        }
    }

    fn watch_force_signal(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let force = self.force_signal.clone();
        let shutdown = self.shutdown.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                reason = force.aborted() => {
                    if let Some(inner) = weak.upgrade() {
                        let rejected = inner.pending.reject_all(RpcError::Aborted(reason));
                        tracing::debug!("force signal rejected {} pending calls", rejected);
                    }
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let hooks = std::mem::take(self.detach.get_mut().unwrap_or_else(PoisonError::into_inner));
        for hook in hooks {
            hook();
        }
        let rejected = self.pending.reject_all(RpcError::Closed);
        if rejected > 0 {
            tracing::debug!("engine dropped with {} pending calls", rejected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanrpc_common::transport::memory;
    use serde_json::json;

    /// An engine with no peer, plus a handle on its own end of the pair.
    fn client() -> (Engine, memory::MemoryChannel) {
        let (left, _right) = memory::pair();
        let engine = Engine::builder().channel(Channel::event(left.clone())).build().unwrap();
        (engine, left)
    }

    #[tokio::test]
    async fn test_stub_identity_is_stable() {
        let (engine, _end) = client();
        let first = engine.method("add");
        let second = engine.method("add");
        assert!(RemoteMethod::ptr_eq(&first, &second));
        assert!(!RemoteMethod::ptr_eq(&first, &engine.method("sub")));
    }

    #[tokio::test]
    async fn test_reserved_names_are_rejected() {
        let (engine, end) = client();
        let err = engine.invoke("rpc.async-iterator.next", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::ReservedMethod(_)));
        assert_eq!(end.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_soft_signal_blocks_new_calls() {
        let (left, _right) = memory::pair();
        let signal = AbortSignal::new();
        let engine = Engine::builder()
            .channel(Channel::event(left))
            .signal(signal.clone())
            .build()
            .unwrap();

        signal.abort();
        let err = engine.invoke("add", vec![json!(1)]).await.unwrap_err();
        assert_eq!(err, RpcError::Aborted(ServiceError::abort_error()));
    }

    #[tokio::test]
    async fn test_prefer_local_implementation_skips_the_channel() {
        let (left, _right) = memory::pair();
        let engine = Engine::builder()
            .implementation(
                Service::builder()
                    .typed_method("double", |(n,): (i64,)| async move { Ok(n * 2) })
                    .build(),
            )
            .channel(Channel::event(left.clone()))
            .prefer_local_implementation(true)
            .build()
            .unwrap();

        assert_eq!(engine.invoke("double", vec![json!(21)]).await.unwrap(), json!(42));
        assert_eq!(left.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_callback_only_channel_cannot_call_out() {
        let (_client, server) = memory::callback_pair();
        let engine = Engine::builder().channel(Channel::callback(server)).build().unwrap();
        let err = engine.invoke("add", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_engine_rejects_pending_calls() {
        let (engine, _end) = client();
        let call = engine.method("never").call(vec![]);
        let handle = tokio::spawn(call);
        tokio::task::yield_now().await;
        assert_eq!(engine.pending_count(), 1);

        drop(engine);
        assert_eq!(handle.await.unwrap(), Err(RpcError::Closed));
    }
}
