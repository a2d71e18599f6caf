pub mod envelope;
pub mod error;
pub mod id;
pub mod params;
pub mod service_error;

#[cfg(test)]
mod tests;

pub use envelope::{
    is_envelope, is_reserved, ErrorObject, ErrorResponse, Incoming, InternalMethod, Invalid,
    Message, Request, Response, SuccessResponse, Version, INTERNAL_ERROR, INVALID_REQUEST,
    JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR, RESERVED_PREFIX,
};
pub use error::{ChanrpcError, Result};
pub use id::Id;
pub use params::{ParameterStructure, Params};
pub use service_error::{ErrorData, ErrorKind, ServiceError, DOM_EXCEPTION_TAG};
