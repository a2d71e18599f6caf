//! Inbound dispatch.
//!
//! Decodes what the channel delivered, answers requests from the local
//! service and settles pending calls from responses. Strict-mode policy is
//! applied here and nowhere else: every "cannot serve this" case is an
//! [`Outcome`] first and only becomes an error reply (or silence) at the end.

use chanrpc_common::transport::{Direction, Payload};
use chanrpc_common::{
    is_envelope, is_reserved, ErrorObject, ErrorResponse, Incoming, InternalMethod, Invalid,
    Message, Request, Response, ServiceError, SuccessResponse,
};
use futures_util::future::{join_all, FutureExt};
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::engine::EngineInner;
use crate::error::RpcError;
use crate::logging::LogEvent;
use crate::recovery::{map_error, recover_error};
use crate::service::{Lookup, Reply};

/// What serving one request produced, before strict-mode policy.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Reply(Value),
    Failed(ServiceError),
    /// Missing or non-callable target
    MethodMissing,
    /// Nothing to send back
    Silent,
}

/// Runs an implementation future, turning a panic into a plain `Error`.
pub(crate) async fn catch_panic<T, F>(fut: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ServiceError::error(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "implementation panicked".to_string()
    }
}

fn to_reply_value(response: Response) -> Option<Value> {
    match serde_json::to_value(&response) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("failed to serialize reply: {}", e);
            None
        }
    }
}

impl EngineInner {
    pub(crate) async fn handle_payload(
        self: &Arc<Self>,
        payload: Payload,
        direction: Option<Direction>,
    ) -> Option<Payload> {
        let reply = match self.codec.decode(payload, direction) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                tracing::warn!("failed to decode inbound payload: {}", e);
                if self.config.strict.unknown_message {
                    to_reply_value(Response::Error(ErrorResponse::from_object(
                        None,
                        ErrorObject::parse_error(),
                    )))
                } else {
                    None
                }
            }
        }?;

        match self.codec.encode(reply, Some(Direction::Response)) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!("failed to encode reply: {}", e);
                None
            }
        }
    }

    async fn handle_value(self: &Arc<Self>, value: Value) -> Option<Value> {
        match Incoming::classify(value) {
            Incoming::Single(message) => self.handle_message(message).await.and_then(to_reply_value),
            Incoming::Batch(items) => {
                tracing::debug!("handling batch of {} messages", items.len());
                let replies: Vec<Value> = join_all(items.into_iter().map(|item| self.handle_item(item)))
                    .await
                    .into_iter()
                    .flatten()
                    .filter_map(to_reply_value)
                    .collect();
                if replies.is_empty() {
                    None
                } else {
                    Some(Value::Array(replies))
                }
            }
            Incoming::Invalid(invalid) => self.reject_invalid(invalid).and_then(to_reply_value),
        }
    }

    async fn handle_item(self: &Arc<Self>, item: Result<Message, Invalid>) -> Option<Response> {
        match item {
            Ok(message) => self.handle_message(message).await,
            Err(invalid) => self.reject_invalid(invalid),
        }
    }

    fn reject_invalid(&self, invalid: Invalid) -> Option<Response> {
        if self.config.strict.unknown_message {
            Some(Response::Error(ErrorResponse::from_object(
                invalid.id,
                ErrorObject::invalid_request(),
            )))
        } else {
            tracing::debug!("ignoring payload that is not an envelope");
            None
        }
    }

    async fn handle_message(self: &Arc<Self>, message: Message) -> Option<Response> {
        match message {
            Message::Request(request) => self.handle_request(request).await,
            Message::Response(response) => {
                self.handle_response(response);
                None
            }
        }
    }

    async fn handle_request(self: &Arc<Self>, request: Request) -> Option<Response> {
        let force = self.force_signal.clone();
        let outcome = tokio::select! {
            biased;
            reason = force.aborted() => Outcome::Failed(reason),
            outcome = self.serve(&request) => outcome,
        };
        self.reply_for(&request, outcome)
    }

    /// Runs the request against the local service.
    async fn serve(self: &Arc<Self>, request: &Request) -> Outcome {
        let service = match self.local.clone().await {
            Ok(service) => service,
            Err(err) => return Outcome::Failed(err),
        };
        let args = request.params.clone().into_args();

        if let Some(op) = InternalMethod::parse(&request.method) {
            return self
                .iterators
                .handle(op, &service, args, self.config.strict.method_not_found)
                .await;
        }
        if is_reserved(&request.method) {
            return Outcome::MethodMissing;
        }

        let handler = match service.lookup(&request.method) {
            Lookup::Found(handler) => handler,
            Lookup::MethodNotFound => {
                tracing::debug!("method not found: {}", request.method);
                return Outcome::MethodMissing;
            }
            Lookup::NotCallable => {
                tracing::debug!("member is not callable: {}", request.method);
                return Outcome::MethodMissing;
            }
        };

        self.logs.emit(LogEvent::BeCalled {
            method: &request.method,
            params: &args,
            remote_stack: request.remote_stack.as_deref(),
        });
        let started = Instant::now();

        match catch_panic(handler(args)).await {
            Ok(Reply::Value(result)) => {
                self.logs.emit(LogEvent::Returned {
                    method: &request.method,
                    result: &result,
                    elapsed: started.elapsed(),
                });
                Outcome::Reply(result)
            }
            Ok(Reply::NoResponse) => Outcome::Silent,
            Err(err) => {
                self.logs.emit(LogEvent::LocalError {
                    method: &request.method,
                    error: &err,
                });
                Outcome::Failed(err)
            }
        }
    }

    /// Applies strict-mode policy. Notifications never get a reply.
    fn reply_for(&self, request: &Request, outcome: Outcome) -> Option<Response> {
        let id = request.id.clone()?;
        match outcome {
            Outcome::Reply(result) => Some(Response::Success(SuccessResponse::new(Some(id), result))),
            Outcome::Failed(err) => {
                let mapper = &self.error_mapper;
                let error = catch_unwind(AssertUnwindSafe(|| mapper(&err, request)))
                    .unwrap_or_else(|_| map_error(&err, false));
                Some(Response::Error(ErrorResponse::from_object(Some(id), error)))
            }
            Outcome::MethodMissing if self.config.strict.method_not_found => Some(Response::Error(
                ErrorResponse::from_object(Some(id), ErrorObject::method_not_found()),
            )),
            Outcome::MethodMissing | Outcome::Silent => None,
        }
    }

    fn handle_response(&self, response: Response) {
        let Some(id) = response.id().cloned() else {
            tracing::debug!("ignoring response without id");
            return;
        };
        let Some(call) = self.pending.take(&id) else {
            tracing::debug!("ignoring response for unknown call {}", id);
            return;
        };
        tracing::debug!("call {} ({}) settled after {:?}", id, call.method, call.issued_at.elapsed());

        match response {
            Response::Success(success) => call.settle(Ok(success.result)),
            Response::Error(failure) => {
                let err = recover_error(&failure.error, call.stack.as_deref());
                self.logs.emit(LogEvent::RemoteError {
                    method: &call.method,
                    error: &err,
                    replay: call.replay.as_ref(),
                });
                call.settle(Err(RpcError::Service(err)));
            }
        }
    }

    pub(crate) fn is_valid_payload(&self, payload: &Payload) -> bool {
        match self.codec.decode(payload.clone(), Some(Direction::Request)) {
            Ok(Value::Array(items)) => !items.is_empty() && items.iter().all(is_envelope),
            Ok(value) => is_envelope(&value),
            Err(_) => false,
        }
    }
}
