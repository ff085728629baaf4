use thiserror::Error;

use crate::broker::BrokerError;
use crate::serializer;

/// Errors the dispatcher cannot attribute to a specific request; they
/// escape to the service loop instead of becoming a response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The envelope cannot carry a reply, or the RPC header is missing
    /// or malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The RPC header names a protocol version this node does not speak.
    #[error("unsupported rpc version `{0}`")]
    UnsupportedVersion(String),

    /// The request asks for a message type this node rejects.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The RPC header names a serializer missing from the registry.
    #[error("unsupported serializer `{0}`")]
    UnsupportedSerializer(String),

    /// An interface with the same case-folded name is already bound.
    #[error("interface `{0}` is already bound")]
    AlreadyBound(String),

    /// The computed response failed to encode.
    #[error("failed to serialize the reply: {0}")]
    SerializeReply(serializer::Error),

    /// The reply failed to publish.
    #[error("failed to publish the reply: {0}")]
    PublishReply(#[from] BrokerError),
}
