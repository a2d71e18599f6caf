use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use super::codec::Payload;
use crate::protocol::error::Result;

/// Receives every payload the channel delivers.
pub type Listener = Arc<dyn Fn(Payload) + Send + Sync>;

/// Unregister/teardown hook returned by a channel.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handles one inbound payload and produces the reply, if any.
pub type RequestHandler = Arc<dyn Fn(Payload) -> BoxFuture<'static, Option<Payload>> + Send + Sync>;

/// Decides whether an inbound payload is protocol traffic.
pub type PayloadValidator = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Push-registration plus fire-and-forget send.
///
/// `send` resolves once the transport has accepted the payload, not when the
/// peer has processed it.
pub trait EventChannel: Send + Sync {
    /// Registers `listener` for every inbound payload.
    fn on(&self, listener: Listener) -> Option<Unsubscribe>;

    /// Hands `payload` to the transport.
    fn send(&self, payload: Payload) -> BoxFuture<'static, Result<()>>;
}

/// A setup hook that receives the engine's request handler.
///
/// The shape of a server endpoint: the transport owns the receive loop, calls
/// the handler for each payload that passes `is_valid`, and writes back
/// whatever reply the handler returns.
pub trait CallbackChannel: Send + Sync {
    fn setup(&self, handler: RequestHandler, is_valid: PayloadValidator) -> Option<Unsubscribe>;
}

/// The channel an engine is attached to.
#[derive(Clone)]
pub enum Channel {
    Event(Arc<dyn EventChannel>),
    Callback(Arc<dyn CallbackChannel>),
    /// Both shapes over one link: outbound calls use the event side,
    /// inbound requests may arrive on either.
    Duplex {
        events: Arc<dyn EventChannel>,
        callbacks: Arc<dyn CallbackChannel>,
    },
}

impl Channel {
    pub fn event(channel: impl EventChannel + 'static) -> Self {
        Channel::Event(Arc::new(channel))
    }

    pub fn callback(channel: impl CallbackChannel + 'static) -> Self {
        Channel::Callback(Arc::new(channel))
    }

    /// The side outbound payloads are sent through, if the channel has one.
    pub fn sender(&self) -> Option<&Arc<dyn EventChannel>> {
        match self {
            Channel::Event(events) | Channel::Duplex { events, .. } => Some(events),
            Channel::Callback(_) => None,
        }
    }

    pub fn callbacks(&self) -> Option<&Arc<dyn CallbackChannel>> {
        match self {
            Channel::Callback(callbacks) | Channel::Duplex { callbacks, .. } => Some(callbacks),
            Channel::Event(_) => None,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Event(_) => f.write_str("Channel::Event"),
            Channel::Callback(_) => f.write_str("Channel::Callback"),
            Channel::Duplex { .. } => f.write_str("Channel::Duplex"),
        }
    }
}
