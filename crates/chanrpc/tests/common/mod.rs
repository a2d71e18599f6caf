//! Shared fixtures: engines wired back to back over the in-memory channel.
#![allow(dead_code)]

use chanrpc::{Engine, EngineBuilder, LogEvent, Logger, Service, ServiceError};
use chanrpc_common::transport::{memory, Channel, EventChannel, Listener, Payload, Unsubscribe};
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Routes engine logs to the test output (`RUST_LOG=chanrpc=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The service most tests call into.
pub fn calculator() -> Service {
    Service::builder()
        .typed_method("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
        .method("echo", |args| async move { Ok(Value::Array(args)) })
        .method("throws", |_| async { Err(ServiceError::error("impl error")) })
        .typed_method("sleep", |(ms,): (u64,)| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .method("never", |_| futures_util::future::pending())
        .stream("count", |_| stream::iter((1..=3).map(|n| Ok::<_, ServiceError>(json!(n)))))
        .build()
}

/// Builds a server serving `service` and a client, each customised by its
/// closure, and connects them. Returns `(client, server, client_end)`.
pub fn connect_with(
    service: Service,
    client: impl FnOnce(EngineBuilder) -> EngineBuilder,
    server: impl FnOnce(EngineBuilder) -> EngineBuilder,
) -> (Engine, Engine, memory::MemoryChannel) {
    init_tracing();
    let (left, right) = memory::pair();
    let server = server(Engine::builder().implementation(service).channel(Channel::event(right)))
        .build()
        .unwrap();
    let client = client(Engine::builder().channel(Channel::event(left.clone())))
        .build()
        .unwrap();
    (client, server, left)
}

pub fn connect(service: Service) -> (Engine, Engine) {
    let (client, server, _) = connect_with(service, |b| b, |b| b);
    (client, server)
}

/// Records every payload delivered to `end`.
pub fn tap(end: &memory::MemoryChannel) -> Arc<Mutex<Vec<Payload>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _ = end.on(Arc::new(move |payload| sink.lock().unwrap().push(payload)));
    seen
}

/// Waits until `condition` holds, failing the test after a second.
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Lets spawned tasks run for a moment.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// A transport that accepts payloads but never finishes sending them.
pub struct StalledChannel;

impl EventChannel for StalledChannel {
    fn on(&self, _listener: Listener) -> Option<Unsubscribe> {
        None
    }

    fn send(&self, _payload: Payload) -> BoxFuture<'static, chanrpc_common::Result<()>> {
        future::pending().boxed()
    }
}

/// Logger keeping a one-line summary of every event, plus any request
/// attached to remote errors.
#[derive(Clone, Default)]
pub struct RecordingLogger {
    events: Arc<Mutex<Vec<String>>>,
    replays: Arc<Mutex<Vec<Value>>>,
}

impl RecordingLogger {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn replays(&self) -> Vec<Value> {
        self.replays.lock().unwrap().clone()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, event: &LogEvent<'_>) {
        let line = match event {
            LogEvent::BeCalled { method, .. } => format!("called {}", method),
            LogEvent::Returned { method, result, .. } => format!("returned {} {}", method, result),
            LogEvent::LocalError { method, error } => format!("local {}: {}", method, error.message),
            LogEvent::RemoteError { method, error, replay } => {
                if let Some(request) = replay {
                    self.replays.lock().unwrap().push((*request).clone());
                }
                format!("remote {}: {}", method, error.message)
            }
        };
        self.events.lock().unwrap().push(line);
    }
}
