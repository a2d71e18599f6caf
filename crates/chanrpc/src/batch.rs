//! Batched calls.
//!
//! Calls made through a [`Batch`] are registered immediately but sent
//! together, as one JSON-RPC batch array, when the batch is flushed. Dropping
//! the queue instead rejects every queued call and sends nothing; so does
//! dropping the last handle to the batch.

use chanrpc_common::transport::Direction;
use chanrpc_common::{is_reserved, Params, Request, ServiceError};
use futures_util::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::EngineInner;
use crate::error::{Result, RpcError};
use crate::lock;
use crate::pending::{PendingReply, PendingTable};

/// Queued requests. Whatever is still queued when the last handle goes
/// away is rejected.
struct Queue {
    requests: Mutex<Vec<Request>>,
    pending: Arc<PendingTable>,
}

impl Queue {
    fn take(&self) -> Vec<Request> {
        std::mem::take(&mut *lock(&self.requests))
    }

    fn settle_all(&self, requests: &[Request], error: RpcError) {
        for id in requests.iter().filter_map(|request| request.id.as_ref()) {
            if let Some(call) = self.pending.take(id) {
                call.settle(Err(error.clone()));
            }
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let requests = std::mem::take(self.requests.get_mut().unwrap_or_else(PoisonError::into_inner));
        if !requests.is_empty() {
            tracing::debug!("batch dropped with {} queued requests", requests.len());
            self.settle_all(&requests, RpcError::Dropped(ServiceError::error("Aborted")));
        }
    }
}

/// A queue of calls sent in one go.
///
/// # Example
///
/// ```
/// use chanrpc::{Engine, Service};
/// use chanrpc_common::transport::{memory, Channel};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let (left, right) = memory::pair();
/// let _server = Engine::builder()
///     .implementation(Service::builder().typed_method("add", |(a, b): (i64, i64)| async move { Ok(a + b) }).build())
///     .channel(Channel::event(right))
///     .build()
///     .unwrap();
/// let client = Engine::builder().channel(Channel::event(left)).build().unwrap();
///
/// let batch = client.batch();
/// let first = batch.call("add", vec![json!(1), json!(2)]);
/// let second = batch.method("add").call(vec![json!(3), json!(4)]);
/// batch.flush().await.unwrap();
/// assert_eq!(first.await.unwrap(), json!(3));
/// assert_eq!(second.await.unwrap(), json!(7));
/// # });
/// ```
#[derive(Clone)]
pub struct Batch {
    engine: Arc<EngineInner>,
    queue: Arc<Queue>,
}

impl Batch {
    pub(crate) fn new(engine: Arc<EngineInner>) -> Self {
        let queue = Queue {
            requests: Mutex::default(),
            pending: Arc::clone(&engine.pending),
        };
        Self {
            engine,
            queue: Arc::new(queue),
        }
    }

    /// A stub whose calls go into this batch.
    pub fn method(&self, name: &str) -> BatchedMethod {
        BatchedMethod {
            batch: self.clone(),
            name: name.to_string(),
        }
    }

    /// Queues a call. The returned future settles after the batch is flushed
    /// and the peer answers, or when the queue is dropped.
    pub fn call(&self, name: &str, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        match self.enqueue_call(name, args) {
            Ok(reply) => reply.wait().boxed(),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    fn enqueue_call(&self, name: &str, args: Vec<Value>) -> Result<PendingReply> {
        self.check(name)?;
        let params = self.engine.config.parameter_structure.apply(args);
        let (request, reply) = self.engine.register_call(name, params)?;
        lock(&self.queue.requests).push(request);
        Ok(reply)
    }

    /// Queues a notification.
    pub fn notify(&self, name: &str, args: Vec<Value>) -> Result<()> {
        self.check(name)?;
        let params: Params = self.engine.config.parameter_structure.apply(args);
        lock(&self.queue.requests).push(Request::new(None, name, params, None));
        Ok(())
    }

    fn check(&self, name: &str) -> Result<()> {
        self.engine.throw_if_aborted()?;
        if is_reserved(name) {
            return Err(RpcError::ReservedMethod(name.to_string()));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        lock(&self.queue.requests).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue.requests).is_empty()
    }

    /// Sends everything queued so far as one batch and empties the queue.
    ///
    /// An empty queue sends nothing. Calls that already settled (their caller
    /// gave up, or the forced signal rejected them) are left out. After a
    /// forced abort nothing is sent and every queued call is rejected with
    /// the abort reason. If the channel refuses the batch, every call in it
    /// is rejected with the same error.
    pub async fn flush(&self) -> Result<()> {
        let mut requests = self.queue.take();
        if requests.is_empty() {
            return Ok(());
        }
        if let Some(reason) = self.engine.force_signal.reason() {
            let err = RpcError::Aborted(reason);
            self.queue.settle_all(&requests, err.clone());
            return Err(err);
        }

        let pending = &self.engine.pending;
        requests.retain(|request| request.id.as_ref().map_or(true, |id| pending.contains(id)));
        if requests.is_empty() {
            return Ok(());
        }
        tracing::debug!("flushing batch of {} requests", requests.len());

        let sent = match serde_json::to_value(&requests) {
            Ok(value) => self.engine.send(value, Direction::Request).await,
            Err(e) => Err(RpcError::Codec(e.to_string())),
        };
        if let Err(err) = &sent {
            self.queue.settle_all(&requests, err.clone());
        }
        sent
    }

    /// Rejects every queued call with [`RpcError::Dropped`] without sending
    /// anything.
    pub fn drop_all(&self, reason: Option<ServiceError>) {
        let requests = self.queue.take();
        let reason = reason.unwrap_or_else(|| ServiceError::error("Aborted"));
        self.queue.settle_all(&requests, RpcError::Dropped(reason));
    }
}

/// Stub form of a batch entry.
#[derive(Clone)]
pub struct BatchedMethod {
    batch: Batch,
    name: String,
}

impl BatchedMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        self.batch.call(&self.name, args)
    }

    pub fn notify(&self, args: Vec<Value>) -> Result<()> {
        self.batch.notify(&self.name, args)
    }
}

#[cfg(test)]
mod tests {
    use crate::{AbortSignal, Engine, RpcError, Service, ServiceError};
    use chanrpc_common::transport::{memory, Channel, EventChannel, Payload};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn tap(end: &memory::MemoryChannel) -> Arc<Mutex<Vec<Payload>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = end.on(Arc::new(move |payload| sink.lock().unwrap().push(payload)));
        seen
    }

    fn client() -> (Engine, memory::MemoryChannel, Engine) {
        let (left, right) = memory::pair();
        let server = Engine::builder()
            .implementation(
                Service::builder()
                    .typed_method("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
                    .build(),
            )
            .channel(Channel::event(right))
            .build()
            .unwrap();
        let client = Engine::builder().channel(Channel::event(left.clone())).build().unwrap();
        (client, left, server)
    }

    #[tokio::test]
    async fn test_nothing_is_sent_before_flush() {
        let (client, end, _server) = client();
        let batch = client.batch();
        let call = batch.call("add", vec![json!(1), json!(1)]);
        batch.notify("add", vec![json!(0), json!(0)]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(client.pending_count(), 1);
        assert_eq!(end.sent_count(), 0);

        batch.flush().await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(end.sent_count(), 1);
        assert_eq!(call.await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_drop_all_rejects_and_sends_nothing() {
        let (client, end, _server) = client();
        let batch = client.batch();
        let first = batch.method("add").call(vec![json!(1), json!(2)]);
        let second = batch.call("add", vec![json!(3), json!(4)]);

        batch.drop_all(None);
        let expected = RpcError::Dropped(ServiceError::error("Aborted"));
        assert_eq!(first.await, Err(expected.clone()));
        assert_eq!(second.await, Err(expected));
        assert_eq!(client.pending_count(), 0);

        batch.flush().await.unwrap();
        assert_eq!(end.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_rejects_every_call() {
        let (client, end, _server) = client();
        let batch = client.batch();
        let call = batch.call("add", vec![json!(1), json!(2)]);
        end.close();

        let err = batch.flush().await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
        assert_eq!(call.await, Err(err));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reserved_names_are_refused() {
        let (client, _end, _server) = client();
        let batch = client.batch();
        let err = batch.call("rpc.anything", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::ReservedMethod(_)));
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_flush_after_forced_abort_sends_nothing() {
        let (left, right) = memory::pair();
        let force = AbortSignal::new();
        let _server = Engine::builder().channel(Channel::event(right)).build().unwrap();
        let client = Engine::builder()
            .channel(Channel::event(left.clone()))
            .force_signal(force.clone())
            .build()
            .unwrap();

        let batch = client.batch();
        let call = batch.call("add", vec![json!(1), json!(2)]);
        batch.notify("add", vec![json!(0), json!(0)]).unwrap();
        force.abort();

        let err = batch.flush().await.unwrap_err();
        assert_eq!(err, RpcError::Aborted(ServiceError::abort_error()));
        assert_eq!(call.await, Err(err));
        assert!(batch.is_empty());
        assert_eq!(left.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_calls_are_left_out_of_the_flush() {
        let (left, right) = memory::pair();
        let requests = tap(&right);
        let _server = Engine::builder().channel(Channel::event(right)).build().unwrap();
        let client = Engine::builder().channel(Channel::event(left)).build().unwrap();

        let batch = client.batch();
        let kept = batch.call("add", vec![json!(1), json!(2)]);
        drop(batch.call("add", vec![json!(3), json!(4)]));
        assert_eq!(batch.len(), 2);
        batch.flush().await.unwrap();

        let requests = requests.lock().unwrap();
        let Payload::Json(Value::Array(sent)) = &requests[0] else {
            panic!("expected a batch payload");
        };
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["params"], json!([1, 2]));
        drop(kept);
    }

    #[tokio::test]
    async fn test_dropping_the_batch_rejects_queued_calls() {
        let (client, end, _server) = client();
        let batch = client.batch();
        let add = batch.method("add");
        let call = add.call(vec![json!(1), json!(2)]);

        drop(batch);
        assert_eq!(client.pending_count(), 1);
        drop(add);
        assert_eq!(call.await, Err(RpcError::Dropped(ServiceError::error("Aborted"))));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(end.sent_count(), 0);
    }
}
