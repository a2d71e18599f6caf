//! Fire-and-forget calls.
//!
//! A notification is a request without an id: nothing is registered in the
//! pending table and the peer never answers. Taking the notification form of
//! something that already is one gives back the same thing.

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::Result;
use crate::stub::Target;

/// Notification form of a [`RemoteMethod`](crate::RemoteMethod).
#[derive(Clone)]
pub struct NotifyMethod {
    target: Arc<Target>,
}

impl NotifyMethod {
    pub(crate) fn new(target: Arc<Target>) -> Self {
        Self { target }
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }

    /// Sends the notification. Resolves once the channel accepted it.
    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<()>> {
        let target = Arc::clone(&self.target);
        async move {
            let engine = target.engine()?;
            engine.notify(target.name(), args).await
        }
        .boxed()
    }

    pub fn notify(&self) -> NotifyMethod {
        self.clone()
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.target, &b.target)
    }
}

impl fmt::Debug for NotifyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyMethod").field("name", &self.name()).finish()
    }
}

/// Notification view of a whole engine.
#[derive(Clone)]
pub struct Notifier {
    engine: Engine,
}

impl Notifier {
    pub(crate) fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn method(&self, name: &str) -> NotifyMethod {
        self.engine.method(name).notify()
    }

    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<()> {
        self.engine.inner.notify(name, args).await
    }

    pub fn notify(&self) -> Notifier {
        self.clone()
    }
}
