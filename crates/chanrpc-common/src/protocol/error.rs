use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChanrpcError {
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ChanrpcError>;
