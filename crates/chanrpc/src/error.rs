use chanrpc_common::{ChanrpcError, ServiceError};
use thiserror::Error;

/// Error returned by every call made through an engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The implementation (remote, or local when preferred) failed.
    #[error("{0}")]
    Service(ServiceError),

    /// A soft or forced abort signal fired; carries the signal's reason.
    #[error("Aborted: {0}")]
    Aborted(ServiceError),

    #[error("TypeError: '{0}' is a reserved method name and cannot be called directly")]
    ReservedMethod(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The batch the call was queued in was dropped.
    #[error("Dropped: {0}")]
    Dropped(ServiceError),

    #[error("Engine closed")]
    Closed,
}

impl RpcError {
    /// The thrown-error model behind this error, when there is one.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            RpcError::Service(err) | RpcError::Aborted(err) | RpcError::Dropped(err) => Some(err),
            _ => None,
        }
    }

    /// Numeric code of a remote failure.
    pub fn code(&self) -> Option<i64> {
        self.service_error().and_then(|err| err.code)
    }
}

impl From<ServiceError> for RpcError {
    fn from(err: ServiceError) -> Self {
        RpcError::Service(err)
    }
}

impl From<ChanrpcError> for RpcError {
    fn from(err: ChanrpcError) -> Self {
        match err {
            ChanrpcError::Channel(msg) => RpcError::Transport(msg),
            ChanrpcError::Closed => RpcError::Transport("channel closed".to_string()),
            ChanrpcError::Codec(msg) | ChanrpcError::InvalidPayload(msg) => RpcError::Codec(msg),
            ChanrpcError::JsonSerialization(e) => RpcError::Codec(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
