//! Pending-call table.
//!
//! Every outbound call with an id has exactly one entry here until it
//! settles. Removal is the single terminal transition: whichever path takes
//! the entry first (response, forced abort, per-call signal, teardown) settles
//! it, and every other path finds nothing and does nothing.

use chanrpc_common::{Id, ServiceError};
use futures_util::future::{self, BoxFuture};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::oneshot;

use crate::abort::AbortSignal;
use crate::error::RpcError;

pub(crate) type CallResult = Result<Value, RpcError>;

/// An outbound payload on its way into the channel.
pub(crate) type SendFuture = BoxFuture<'static, Result<(), RpcError>>;

pub(crate) struct PendingCall {
    pub(crate) method: String,
    /// Caller stack captured when the call was issued
    pub(crate) stack: Option<String>,
    /// The request as sent, kept for request-replay logging
    pub(crate) replay: Option<Value>,
    pub(crate) issued_at: Instant,
    tx: oneshot::Sender<CallResult>,
}

impl PendingCall {
    pub(crate) fn new(
        method: impl Into<String>,
        stack: Option<String>,
        replay: Option<Value>,
    ) -> (Self, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            method: method.into(),
            stack,
            replay,
            issued_at: Instant::now(),
            tx,
        };
        (call, rx)
    }

    /// Settles the call. A caller that stopped waiting is not an error.
    pub(crate) fn settle(self, result: CallResult) {
        let _ = self.tx.send(result);
    }
}

#[derive(Default)]
pub(crate) struct PendingTable {
    calls: Mutex<HashMap<Id, PendingCall>>,
}

impl PendingTable {
    fn calls(&self) -> MutexGuard<'_, HashMap<Id, PendingCall>> {
        crate::lock(&self.calls)
    }

    pub(crate) fn insert(&self, id: Id, call: PendingCall) {
        if let Some(previous) = self.calls().insert(id.clone(), call) {
            tracing::warn!("call id {} reused while still pending", id);
            previous.settle(Err(RpcError::Transport(format!("call id {} was reused", id))));
        }
    }

    pub(crate) fn take(&self, id: &Id) -> Option<PendingCall> {
        self.calls().remove(id)
    }

    pub(crate) fn contains(&self, id: &Id) -> bool {
        self.calls().contains_key(id)
    }

    pub(crate) fn drain(&self) -> Vec<(Id, PendingCall)> {
        self.calls().drain().collect()
    }

    /// Settles every pending call with `error`.
    pub(crate) fn reject_all(&self, error: RpcError) -> usize {
        let drained = self.drain();
        let count = drained.len();
        for (_, call) in drained {
            call.settle(Err(error.clone()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.calls().len()
    }
}

/// Removes a call's entry when the waiting future goes away early.
pub(crate) struct PendingGuard {
    table: Arc<PendingTable>,
    id: Option<Id>,
}

impl PendingGuard {
    pub(crate) fn new(table: Arc<PendingTable>, id: Id) -> Self {
        Self { table, id: Some(id) }
    }

    /// The entry has been settled by someone else; leave the table alone.
    pub(crate) fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.table.take(&id);
        }
    }
}

/// The caller's side of a registered call.
///
/// The request's send runs inside [`wait`](Self::wait), so a call whose
/// send is stuck still settles when its entry is rejected or its signal
/// fires.
pub(crate) struct PendingReply {
    rx: oneshot::Receiver<CallResult>,
    guard: PendingGuard,
    signal: Option<AbortSignal>,
    send: Option<SendFuture>,
}

enum Step {
    Settled(Result<CallResult, oneshot::error::RecvError>),
    Aborted(ServiceError),
    Sent(Result<(), RpcError>),
}

async fn aborted(signal: Option<&AbortSignal>) -> ServiceError {
    match signal {
        Some(signal) => signal.aborted().await,
        None => future::pending().await,
    }
}

async fn sending(send: &mut Option<SendFuture>) -> Result<(), RpcError> {
    match send {
        Some(send) => send.await,
        None => future::pending().await,
    }
}

impl PendingReply {
    pub(crate) fn new(rx: oneshot::Receiver<CallResult>, guard: PendingGuard) -> Self {
        Self {
            rx,
            guard,
            signal: None,
            send: None,
        }
    }

    /// Gives up on the call, removing its entry, if `signal` fires first.
    pub(crate) fn with_signal(mut self, signal: Option<AbortSignal>) -> Self {
        self.signal = signal;
        self
    }

    /// Sends the request while waiting. A failed send rejects the call.
    pub(crate) fn with_send(mut self, send: SendFuture) -> Self {
        self.send = Some(send);
        self
    }

    pub(crate) async fn wait(self) -> CallResult {
        let Self {
            mut rx,
            guard,
            signal,
            mut send,
        } = self;

        let settled = loop {
            let step = tokio::select! {
                biased;
                settled = &mut rx => Step::Settled(settled),
                reason = aborted(signal.as_ref()) => Step::Aborted(reason),
                sent = sending(&mut send) => Step::Sent(sent),
            };
            match step {
                Step::Settled(settled) => break settled,
                Step::Aborted(reason) => return Err(RpcError::Aborted(reason)),
                Step::Sent(Ok(())) => send = None,
                Step::Sent(Err(err)) => return Err(err),
            }
        };
        guard.disarm();
        settled.unwrap_or(Err(RpcError::Closed))
    }
}
