use chanrpc_common::ServiceError;
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of an iteration: `{done, value}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterResult {
    pub done: bool,
    #[serde(default)]
    pub value: Value,
}

impl IterResult {
    pub fn yielded(value: Value) -> Self {
        Self { done: false, value }
    }

    pub fn done(value: Value) -> Self {
        Self { done: true, value }
    }
}

/// A lazy sequence that can be driven from the other side of a channel.
///
/// Mirrors a native generator: `next` resumes it, `throw` raises an error at
/// the suspension point and `return_with` finishes it early. The defaults
/// behave like a generator with no error handling or cleanup of its own.
pub trait RemoteIterator: Send {
    fn next(&mut self, value: Value) -> BoxFuture<'_, Result<IterResult, ServiceError>>;

    fn throw(&mut self, error: Value) -> BoxFuture<'_, Result<IterResult, ServiceError>> {
        future::ready(Err(ServiceError::from_thrown(error))).boxed()
    }

    fn return_with(&mut self, value: Value) -> BoxFuture<'_, Result<IterResult, ServiceError>> {
        future::ready(Ok(IterResult::done(value))).boxed()
    }
}

/// [`RemoteIterator`] over a stream of values.
///
/// The stream ends the iteration when it ends or yields an error; values
/// passed to `next` are ignored.
pub struct StreamIterator {
    stream: Option<BoxStream<'static, Result<Value, ServiceError>>>,
}

impl StreamIterator {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, ServiceError>> + Send + 'static,
    {
        Self {
            stream: Some(stream.boxed()),
        }
    }
}

impl RemoteIterator for StreamIterator {
    fn next(&mut self, _value: Value) -> BoxFuture<'_, Result<IterResult, ServiceError>> {
        async move {
            let item = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => return Ok(IterResult::done(Value::Null)),
            };
            match item {
                Some(Ok(value)) => Ok(IterResult::yielded(value)),
                Some(Err(err)) => {
                    self.stream = None;
                    Err(err)
                }
                None => {
                    self.stream = None;
                    Ok(IterResult::done(Value::Null))
                }
            }
        }
        .boxed()
    }

    fn throw(&mut self, error: Value) -> BoxFuture<'_, Result<IterResult, ServiceError>> {
        self.stream = None;
        future::ready(Err(ServiceError::from_thrown(error))).boxed()
    }

    fn return_with(&mut self, value: Value) -> BoxFuture<'_, Result<IterResult, ServiceError>> {
        self.stream = None;
        future::ready(Ok(IterResult::done(value))).boxed()
    }
}
