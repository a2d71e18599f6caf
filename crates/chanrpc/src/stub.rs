//! Remote method stubs.

use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::abort::AbortSignal;
use crate::engine::EngineInner;
use crate::error::{Result, RpcError};
use crate::notify::NotifyMethod;

/// A stub's target: one method name on one engine.
pub(crate) struct Target {
    engine: Weak<EngineInner>,
    name: String,
}

impl Target {
    pub(crate) fn new(engine: Weak<EngineInner>, name: &str) -> Self {
        Self {
            engine,
            name: name.to_string(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn engine(&self) -> Result<Arc<EngineInner>> {
        self.engine.upgrade().ok_or(RpcError::Closed)
    }
}

/// Callable stand-in for a method on the peer.
///
/// Obtained from [`Engine::method`](crate::Engine::method). Stubs do not keep
/// the engine alive; calling one after the engine is gone fails with
/// [`RpcError::Closed`].
#[derive(Clone)]
pub struct RemoteMethod {
    target: Arc<Target>,
}

impl RemoteMethod {
    pub(crate) fn new(engine: Weak<EngineInner>, name: &str) -> Self {
        Self {
            target: Arc::new(Target::new(engine, name)),
        }
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }

    /// Whether two stubs are the same memoized stub.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.target, &b.target)
    }

    /// Calls the method and waits for its result.
    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        self.issue(args, None)
    }

    /// Calls the method, giving up with [`RpcError::Aborted`] if `signal`
    /// fires first. The call's pending entry is removed; a late response is
    /// ignored.
    pub fn call_with_signal(&self, args: Vec<Value>, signal: &AbortSignal) -> BoxFuture<'static, Result<Value>> {
        self.issue(args, Some(signal.clone()))
    }

    /// Calls the method and deserializes the result.
    pub async fn call_as<R: DeserializeOwned>(&self, args: Vec<Value>) -> Result<R> {
        let value = self.call(args).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Codec(e.to_string()))
    }

    /// The notification form of this stub.
    pub fn notify(&self) -> NotifyMethod {
        NotifyMethod::new(Arc::clone(&self.target))
    }

    fn issue(&self, args: Vec<Value>, signal: Option<AbortSignal>) -> BoxFuture<'static, Result<Value>> {
        let target = Arc::clone(&self.target);
        async move {
            let issued = {
                let engine = target.engine()?;
                engine.issue(target.name(), args, signal).await?
            };
            issued.settle().await
        }
        .boxed()
    }
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethod").field("name", &self.name()).finish()
    }
}
