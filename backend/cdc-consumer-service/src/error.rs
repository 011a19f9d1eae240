use thiserror::Error;

pub type Result<T> = std::result::Result<T, CdcError>;

/// Failure to turn a raw record value into an envelope.
///
/// Only raised for payloads that are not usable key/value data at all.
/// Unknown or mistyped fields never produce one of these.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload is valid JSON but not an object (found {0})")]
    NotAnObject(&'static str),
}

#[derive(Debug, Error)]
pub enum CdcError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CdcError {
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
