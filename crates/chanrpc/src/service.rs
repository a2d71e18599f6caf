//! Local service registry.
//!
//! A [`Service`] is the implementation an engine exposes to its peer: a map
//! from method name to an async handler, a generator factory, or a plain
//! (non-callable) value. Lookups never panic and report what they found as a
//! [`Lookup`] so the dispatcher can apply strict-mode policy.
//!
//! # Example
//!
//! ```
//! use chanrpc::Service;
//! use serde_json::json;
//!
//! let service = Service::builder()
//!     .typed_method("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
//!     .value("version", json!("1.0"))
//!     .build();
//! assert!(service.contains("add"));
//! ```

use chanrpc_common::ServiceError;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::generator::{RemoteIterator, StreamIterator};

/// What a local method produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Value),
    /// Send nothing back, even when the request carried an id.
    NoResponse,
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

pub type MethodHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Reply, ServiceError>> + Send + Sync>;

pub type GeneratorFactory =
    Arc<dyn Fn(Vec<Value>) -> Result<Box<dyn RemoteIterator>, ServiceError> + Send + Sync>;

#[derive(Clone)]
enum Member {
    Method(MethodHandler),
    Generator(GeneratorFactory),
    Value(Value),
}

/// Result of resolving a name on a [`Service`].
pub enum Lookup<T> {
    Found(T),
    MethodNotFound,
    NotCallable,
}

#[derive(Clone, Default)]
pub struct Service {
    members: HashMap<String, Member>,
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Resolves a plain method.
    pub fn lookup(&self, name: &str) -> Lookup<MethodHandler> {
        match self.members.get(name) {
            Some(Member::Method(handler)) => Lookup::Found(Arc::clone(handler)),
            Some(Member::Generator(_)) | Some(Member::Value(_)) => Lookup::NotCallable,
            None => Lookup::MethodNotFound,
        }
    }

    /// Resolves a generator.
    pub fn lookup_generator(&self, name: &str) -> Lookup<GeneratorFactory> {
        match self.members.get(name) {
            Some(Member::Generator(factory)) => Lookup::Found(Arc::clone(factory)),
            Some(Member::Method(_)) | Some(Member::Value(_)) => Lookup::NotCallable,
            None => Lookup::MethodNotFound,
        }
    }

    /// A registered non-callable value.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.members.get(name) {
            Some(Member::Value(value)) => Some(value),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct ServiceBuilder {
    members: HashMap<String, Member>,
}

impl ServiceBuilder {
    /// Registers a method taking the raw argument list.
    pub fn method<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        self.raw_method(name, move |args| {
            let fut = f(args);
            async move { fut.await.map(Reply::Value) }
        })
    }

    /// Registers a method whose arguments deserialize into `A` (usually a
    /// tuple) and whose result serializes from `R`.
    ///
    /// Arguments that do not fit `A` fail the call with a `TypeError`.
    pub fn typed_method<A, R, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.raw_method(name, move |args| {
            let f = Arc::clone(&f);
            async move {
                let args: A = serde_json::from_value(Value::Array(args)).map_err(ServiceError::from)?;
                let result = f(args).await?;
                let value = serde_json::to_value(result).map_err(ServiceError::from)?;
                Ok::<_, ServiceError>(Reply::Value(value))
            }
        })
    }

    /// Registers a method that may suppress its reply with [`Reply::NoResponse`].
    pub fn raw_method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, ServiceError>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |args| f(args).boxed());
        self.members.insert(name.into(), Member::Method(handler));
        self
    }

    /// Registers a generator.
    pub fn generator<F, I>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<I, ServiceError> + Send + Sync + 'static,
        I: RemoteIterator + 'static,
    {
        let factory: GeneratorFactory = Arc::new(move |args| {
            let iter = f(args)?;
            Ok(Box::new(iter) as Box<dyn RemoteIterator>)
        });
        self.members.insert(name.into(), Member::Generator(factory));
        self
    }

    /// Registers a generator backed by a stream.
    pub fn stream<F, S>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value, ServiceError>> + Send + 'static,
    {
        self.generator(name, move |args| Ok(StreamIterator::new(f(args))))
    }

    /// Registers a non-callable member.
    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.members.insert(name.into(), Member::Value(value));
        self
    }

    pub fn build(self) -> Service {
        Service {
            members: self.members,
        }
    }
}
