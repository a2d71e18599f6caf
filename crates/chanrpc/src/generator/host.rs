use chanrpc_common::{InternalMethod, ServiceError};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::iterator::RemoteIterator;
use crate::dispatch::{catch_panic, Outcome};
use crate::lock;
use crate::service::{Lookup, Service};

type SharedIterator = Arc<tokio::sync::Mutex<Box<dyn RemoteIterator>>>;

struct HostedIterator {
    iter: SharedIterator,
    last_used: Instant,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Next,
    Return,
    Throw,
}

/// Host-side table of live remote iterators.
///
/// An iterator leaves the table when it reports `done` or fails. With an idle
/// timeout configured, iterators nobody has driven for that long are dropped
/// on the next `start`.
pub(crate) struct IteratorHost {
    entries: Mutex<HashMap<String, HostedIterator>>,
    next_id: AtomicU64,
    idle_timeout: Option<Duration>,
}

impl IteratorHost {
    pub(crate) fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            entries: Mutex::default(),
            next_id: AtomicU64::new(0),
            idle_timeout,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Serves one internal iterator call.
    pub(crate) async fn handle(
        &self,
        op: InternalMethod,
        service: &Service,
        args: Vec<Value>,
        strict: bool,
    ) -> Outcome {
        let step = match op {
            InternalMethod::IteratorStart => return self.start(service, args),
            InternalMethod::IteratorNext => Step::Next,
            InternalMethod::IteratorReturn => Step::Return,
            InternalMethod::IteratorThrow => Step::Throw,
        };

        let mut args = args.into_iter();
        let id = match args.next() {
            Some(Value::String(id)) => Some(id),
            _ => None,
        };
        let value = args.next().unwrap_or(Value::Null);

        let Some((id, iter)) = id.and_then(|id| self.touch(&id).map(|iter| (id, iter))) else {
            if strict {
                return Outcome::Failed(ServiceError::error(format!(
                    "Remote iterator not found while executing {}()",
                    op.operation()
                )));
            }
            tracing::debug!("ignoring {} for unknown iterator", op.wire_name());
            return Outcome::Silent;
        };

        let result = {
            let mut iter = iter.lock().await;
            let fut = match step {
                Step::Next => iter.next(value),
                Step::Return => iter.return_with(value),
                Step::Throw => iter.throw(value),
            };
            catch_panic(fut).await
        };

        match result {
            Ok(reply) => {
                if reply.done {
                    self.remove(&id);
                }
                match serde_json::to_value(&reply) {
                    Ok(value) => Outcome::Reply(value),
                    Err(e) => Outcome::Failed(ServiceError::from(e)),
                }
            }
            Err(err) => {
                self.remove(&id);
                Outcome::Failed(err)
            }
        }
    }

    fn start(&self, service: &Service, args: Vec<Value>) -> Outcome {
        self.sweep();

        let mut args = args.into_iter();
        let Some(Value::String(name)) = args.next() else {
            return Outcome::Failed(ServiceError::type_error(
                "rpc.async-iterator.start expects a method name",
            ));
        };
        let call_args = match args.next() {
            Some(Value::Array(values)) => values,
            Some(object @ Value::Object(_)) => vec![object],
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Outcome::Failed(ServiceError::type_error(
                    "rpc.async-iterator.start expects an argument list",
                ))
            }
        };

        let factory = match service.lookup_generator(&name) {
            Lookup::Found(factory) => factory,
            Lookup::MethodNotFound | Lookup::NotCallable => {
                tracing::debug!("generator not found: {}", name);
                return Outcome::MethodMissing;
            }
        };

        let iter = match catch_unwind(AssertUnwindSafe(|| factory(call_args))) {
            Ok(Ok(iter)) => iter,
            Ok(Err(err)) => return Outcome::Failed(err),
            Err(_) => return Outcome::Failed(ServiceError::error("generator panicked while starting")),
        };

        let id = format!("iter-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).insert(
            id.clone(),
            HostedIterator {
                iter: Arc::new(tokio::sync::Mutex::new(iter)),
                last_used: Instant::now(),
            },
        );
        tracing::debug!("started remote iterator {} for {}", id, name);
        Outcome::Reply(Value::String(id))
    }

    fn touch(&self, id: &str) -> Option<SharedIterator> {
        let mut entries = lock(&self.entries);
        let entry = entries.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(Arc::clone(&entry.iter))
    }

    fn remove(&self, id: &str) {
        lock(&self.entries).remove(id);
    }

    fn sweep(&self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.last_used.elapsed() < timeout);
        let swept = before - entries.len();
        if swept > 0 {
            tracing::debug!("dropped {} idle remote iterators", swept);
        }
    }
}
