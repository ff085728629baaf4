//! Versioned ASCII header lines for RPC and event messages.
//!
//! The header value is a single space-separated line: `"1.1 json Single"`
//! for RPC, `"1.1 json"` for events. The header keys are part of the wire
//! contract and must stay stable across nodes.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use thiserror::Error;

/// Well-known header key carrying the RPC header line.
pub const RPC_HEADER: &str = "X-RPC";

/// Well-known header key carrying the event header line.
pub const EVENT_HEADER: &str = "X-Event";

/// Protocol version emitted by this node.
pub const PROTOCOL_VERSION: &str = "1.1";

/// Errors raised when parsing a header line.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The header value is not ASCII text.
    #[error("header value is not ascii text")]
    NotAscii,

    /// The header line does not have the expected field count.
    #[error("malformed header line `{0}`")]
    Malformed(String),

    /// The message-type field is not a known token.
    #[error("unknown rpc message type `{0}`")]
    UnknownMessageType(String),
}

/// The message-type field of an RPC header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcMessageKind {
    /// One request per envelope.
    Single,

    /// Several requests per envelope. Parsed, but rejected at dispatch.
    Batch,
}

impl FromStr for RpcMessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Single" => Ok(Self::Single),
            "Batch" => Ok(Self::Batch),
            other => Err(Error::UnknownMessageType(other.to_string())),
        }
    }
}

impl fmt::Display for RpcMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "Single"),
            Self::Batch => write!(f, "Batch"),
        }
    }
}

/// Parsed `X-RPC` header line: `"<version> <serializer> <message-type>"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcHeader {
    /// Protocol version, kept verbatim so dispatch can report mismatches.
    pub version: String,

    /// Registry name of the serializer that encoded the body.
    pub serializer: String,

    /// Whether the envelope carries a single request or a batch.
    pub kind: RpcMessageKind,
}

impl RpcHeader {
    /// A current-version single-request header for the given serializer.
    #[must_use]
    pub fn single(serializer: &str) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            serializer: serializer.to_string(),
            kind: RpcMessageKind::Single,
        }
    }

    /// Parses the header line from raw header-value bytes.
    ///
    /// # Errors
    /// Returns an error if the value is not ASCII or does not have exactly
    /// three fields with a known message type.
    pub fn parse(value: &[u8]) -> Result<Self, Error> {
        let line = ascii_line(value)?;
        let mut fields = line.split_ascii_whitespace();
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(version), Some(serializer), Some(kind), None) => Ok(Self {
                version: version.to_string(),
                serializer: serializer.to_string(),
                kind: kind.parse()?,
            }),
            _ => Err(Error::Malformed(line.to_string())),
        }
    }

    /// Encodes the header line into header-value bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{} {} {}", self.version, self.serializer, self.kind))
    }
}

/// Parsed `X-Event` header line: `"<version> <serializer>"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventHeader {
    /// Protocol version, kept verbatim so decoding can report mismatches.
    pub version: String,

    /// Registry name of the serializer that encoded the body.
    pub serializer: String,
}

impl EventHeader {
    /// A current-version event header for the given serializer.
    #[must_use]
    pub fn new(serializer: &str) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            serializer: serializer.to_string(),
        }
    }

    /// Parses the header line from raw header-value bytes.
    ///
    /// # Errors
    /// Returns an error if the value is not ASCII or does not have exactly
    /// two fields.
    pub fn parse(value: &[u8]) -> Result<Self, Error> {
        let line = ascii_line(value)?;
        let mut fields = line.split_ascii_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(version), Some(serializer), None) => Ok(Self {
                version: version.to_string(),
                serializer: serializer.to_string(),
            }),
            _ => Err(Error::Malformed(line.to_string())),
        }
    }

    /// Encodes the header line into header-value bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{} {}", self.version, self.serializer))
    }
}

fn ascii_line(value: &[u8]) -> Result<&str, Error> {
    let line = std::str::from_utf8(value).map_err(|_| Error::NotAscii)?;
    if line.is_ascii() {
        Ok(line)
    } else {
        Err(Error::NotAscii)
    }
}
