use thiserror::Error;

use crate::broker::{BrokerError, QueueError};

/// Errors raised while opening a subscription or decoding events.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The event header is missing or the body does not decode.
    #[error("invalid event data: {0}")]
    InvalidData(String),

    /// The event header names a protocol version this node does not
    /// speak.
    #[error("unsupported event version `{0}`")]
    UnsupportedVersion(String),

    /// The event header names a serializer missing from the registry.
    #[error("unsupported serializer `{0}`")]
    UnsupportedSerializer(String),

    /// The underlying queue receive failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A broker declaration failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
