use chanrpc_common::{InternalMethod, ServiceError};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Weak;
use tokio::task::JoinHandle;

use super::iterator::IterResult;
use crate::engine::EngineInner;
use crate::error::{Result, RpcError};

/// Stub for a generator on the peer.
#[derive(Clone)]
pub struct RemoteGenerator {
    engine: Weak<EngineInner>,
    name: String,
}

impl RemoteGenerator {
    pub(crate) fn new(engine: Weak<EngineInner>, name: &str) -> Self {
        Self {
            engine,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a remote iterator and asks the peer to start it right away.
    ///
    /// Failures to start surface on the first `next`, `throw` or
    /// `return_with`.
    pub fn call(&self, args: Vec<Value>) -> RemoteIter {
        let state = match self.start(args) {
            Ok(start) => State::Starting(start),
            Err(err) => State::Refused(err),
        };
        RemoteIter {
            engine: self.engine.clone(),
            method: self.name.clone(),
            state,
        }
    }

    fn start(&self, args: Vec<Value>) -> Result<JoinHandle<Result<Value>>> {
        let engine = self.engine.upgrade().ok_or(RpcError::Closed)?;
        let args = vec![Value::String(self.name.clone()), Value::Array(args)];
        let reply = engine.issue_internal(InternalMethod::IteratorStart, args)?;
        Ok(engine.runtime.spawn(reply.wait()))
    }
}

enum State {
    /// The start call is in flight
    Starting(JoinHandle<Result<Value>>),
    /// The start call could not be issued
    Refused(RpcError),
    /// Started; holds the host's iterator id
    Running(Value),
    Done,
}

/// Caller side of a remote iterator.
///
/// Behaves like a native generator: once it reports `done`, fails, or is
/// finished with [`return_with`](Self::return_with) or
/// [`throw`](Self::throw), every further `next` is `done` without a round
/// trip.
pub struct RemoteIter {
    engine: Weak<EngineInner>,
    method: String,
    state: State,
}

impl RemoteIter {
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Resumes the iterator with `value`.
    pub async fn next(&mut self, value: Value) -> Result<IterResult> {
        match self.started().await? {
            Some(id) => self.drive(InternalMethod::IteratorNext, id, value).await,
            None => Ok(IterResult::done(Value::Null)),
        }
    }

    /// Raises `error` inside the remote iterator.
    pub async fn throw(&mut self, error: Value) -> Result<IterResult> {
        match self.started().await? {
            Some(id) => self.drive(InternalMethod::IteratorThrow, id, error).await,
            None => Err(RpcError::Service(ServiceError::from_thrown(error))),
        }
    }

    /// Finishes the iterator early.
    pub async fn return_with(&mut self, value: Value) -> Result<IterResult> {
        match self.started().await? {
            Some(id) => self.drive(InternalMethod::IteratorReturn, id, value).await,
            None => Ok(IterResult::done(value)),
        }
    }

    /// Drives the iterator to completion as a stream of yielded values.
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self) -> BoxStream<'static, Result<Value>> {
        stream::unfold(Some(self), |iter| async move {
            let mut iter = iter?;
            match iter.next(Value::Null).await {
                Ok(step) if step.done => None,
                Ok(step) => Some((Ok(step.value), Some(iter))),
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }

    /// The host's iterator id once the start call has answered. `None` once
    /// the iterator is finished.
    async fn started(&mut self) -> Result<Option<Value>> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Done => Ok(None),
            State::Refused(err) => Err(err),
            State::Running(id) => {
                self.state = State::Running(id.clone());
                Ok(Some(id))
            }
            State::Starting(start) => {
                let id = start.await.map_err(|_| RpcError::Closed)??;
                tracing::debug!("remote iterator {} started for {}", id, self.method);
                self.state = State::Running(id.clone());
                Ok(Some(id))
            }
        }
    }

    async fn drive(&mut self, op: InternalMethod, id: Value, value: Value) -> Result<IterResult> {
        let reply = match self.engine.upgrade() {
            Some(engine) => engine.issue_internal(op, vec![id, value]),
            None => Err(RpcError::Closed),
        };
        let result = match reply {
            Ok(reply) => reply.wait().await.and_then(|value| {
                serde_json::from_value::<IterResult>(value).map_err(|e| RpcError::Codec(e.to_string()))
            }),
            Err(err) => Err(err),
        };

        if !matches!(&result, Ok(step) if !step.done) {
            self.state = State::Done;
        }
        result
    }
}

impl fmt::Debug for RemoteIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Starting(_) => "starting",
            State::Refused(_) => "refused",
            State::Running(_) => "running",
            State::Done => "done",
        };
        f.debug_struct("RemoteIter")
            .field("method", &self.method)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, Service, StreamIterator};
    use chanrpc_common::transport::{memory, Channel};
    use futures_util::StreamExt;
    use serde_json::json;

    fn pair() -> (Engine, Engine, memory::MemoryChannel) {
        let (left, right) = memory::pair();
        let server = Engine::builder()
            .implementation(
                Service::builder()
                    .stream("count", |_| {
                        stream::iter((1..=3).map(|n| Ok::<_, ServiceError>(json!(n))))
                    })
                    .generator("broken", |_| {
                        Ok(StreamIterator::new(stream::iter(vec![
                            Ok(json!("first")),
                            Err(ServiceError::range_error("out of range")),
                        ])))
                    })
                    .build(),
            )
            .channel(Channel::event(right))
            .build()
            .unwrap();
        let client = Engine::builder().channel(Channel::event(left.clone())).build().unwrap();
        (client, server, left)
    }

    #[tokio::test]
    async fn test_next_yields_then_finishes() {
        let (client, _server, _end) = pair();
        let mut iter = client.generator("count").call(vec![]);
        for n in 1..=3 {
            assert_eq!(iter.next(Value::Null).await.unwrap(), IterResult::yielded(json!(n)));
        }
        assert_eq!(iter.next(Value::Null).await.unwrap(), IterResult::done(Value::Null));
        assert!(iter.is_done());
    }

    #[tokio::test]
    async fn test_call_starts_the_iterator() {
        let (client, server, end) = pair();
        let _iter = client.generator("count").call(vec![]);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(end.sent_count(), 1);
        assert_eq!(server.inner.iterators.len(), 1);
    }

    #[tokio::test]
    async fn test_finished_iterator_does_not_call_out() {
        let (client, server, end) = pair();
        let mut iter = client.generator("count").call(vec![]);

        iter.next(Value::Null).await.unwrap();
        assert_eq!(server.inner.iterators.len(), 1);
        assert_eq!(iter.return_with(json!("bye")).await.unwrap(), IterResult::done(json!("bye")));
        assert_eq!(server.inner.iterators.len(), 0);

        let sent = end.sent_count();
        assert!(iter.next(Value::Null).await.unwrap().done);
        assert_eq!(end.sent_count(), sent);
    }

    #[tokio::test]
    async fn test_remote_error_ends_iteration() {
        let (client, _server, _end) = pair();
        let mut iter = client.generator("broken").call(vec![]);
        assert_eq!(iter.next(Value::Null).await.unwrap(), IterResult::yielded(json!("first")));

        let err = iter.next(Value::Null).await.unwrap_err();
        let service = err.service_error().unwrap();
        assert_eq!(service.kind.name(), "RangeError");
        assert_eq!(service.message, "out of range");
        assert!(iter.is_done());
    }

    #[tokio::test]
    async fn test_throw_before_first_next_reaches_the_host() {
        let (client, server, end) = pair();
        let mut iter = client.generator("count").call(vec![]);
        let err = iter.throw(json!("nope")).await.unwrap_err();
        let service = err.service_error().unwrap();
        assert_eq!(service.message, "nope");
        assert_eq!(service.kind.name(), "Error");

        // start and throw, then nothing more
        assert_eq!(end.sent_count(), 2);
        assert_eq!(server.inner.iterators.len(), 0);
        assert!(iter.next(Value::Null).await.unwrap().done);
        assert_eq!(end.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_start_refused_after_forced_abort() {
        let (left, _right) = memory::pair();
        let force = crate::AbortSignal::new();
        let client = Engine::builder()
            .channel(Channel::event(left.clone()))
            .force_signal(force.clone())
            .build()
            .unwrap();
        force.abort();

        let mut iter = client.generator("count").call(vec![]);
        assert_eq!(left.sent_count(), 0);
        let err = iter.next(Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Aborted(_)));
        assert!(iter.next(Value::Null).await.unwrap().done);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (client, _server, _end) = pair();
        let values: Vec<Value> = client
            .generator("count")
            .call(vec![])
            .into_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);

        let items: Vec<_> = client.generator("broken").call(vec![]).into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_unknown_generator() {
        let (client, _server, _end) = pair();
        let err = client.generator("missing").call(vec![]).next(Value::Null).await.unwrap_err();
        assert_eq!(err.code(), Some(chanrpc_common::METHOD_NOT_FOUND));
    }
}
