//! RPC request and response payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known response error codes.
pub mod codes {
    /// The interface or operation is not bound.
    pub const NOT_FOUND: &str = "NotFound";

    /// The request shape or arguments are invalid.
    pub const BAD_REQUEST: &str = "BadRequest";

    /// The handler failed without raising a structured fault.
    pub const EXCEPTION: &str = "Exception";

    /// The requested member kind is not supported.
    pub const NOT_IMPLEMENTED: &str = "NotImplemented";
}

/// One parsed single-call request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Name of the bound interface, matched case-insensitively.
    pub interface: String,

    /// Name of the operation on the interface.
    pub operation: String,

    /// Argument values keyed by parameter name.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// The outcome of one request: a value, or a coded error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    /// The request failed; `error_code` is a short token such as
    /// `"NotFound"` or a handler-defined code.
    Error {
        /// Short error token.
        error_code: String,

        /// Human-readable detail.
        error_message: String,
    },

    /// The request succeeded; `ok` is null for operations declared to
    /// return no value.
    Ok {
        /// The produced value.
        ok: Value,
    },
}

impl RpcResponse {
    /// A success response wrapping `value`.
    #[must_use]
    pub fn ok(value: Value) -> Self {
        Self::Ok { ok: value }
    }

    /// An error response with the given code and message.
    pub fn error<C, M>(code: C, message: M) -> Self
    where
        C: Into<String>,
        M: Into<String>,
    {
        Self::Error {
            error_code: code.into(),
            error_message: message.into(),
        }
    }

    /// Whether this is an error response.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<Fault> for RpcResponse {
    fn from(fault: Fault) -> Self {
        Self::Error {
            error_code: fault.code,
            error_message: fault.message,
        }
    }
}

/// A structured fault raised by handler code; becomes an error response
/// with the handler's own code instead of the generic `"Exception"`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct Fault {
    /// Short error token returned to the caller.
    pub code: String,

    /// Human-readable detail returned to the caller.
    pub message: String,
}

impl Fault {
    /// A fault with an arbitrary code.
    pub fn new<C, M>(code: C, message: M) -> Self
    where
        C: Into<String>,
        M: Into<String>,
    {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A `"NotFound"` fault.
    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::new(codes::NOT_FOUND, message)
    }

    /// A `"BadRequest"` fault.
    pub fn bad_request<M: Into<String>>(message: M) -> Self {
        Self::new(codes::BAD_REQUEST, message)
    }

    /// An `"Exception"` fault stringifying an arbitrary handler error.
    pub fn exception<E: std::fmt::Display>(error: E) -> Self {
        Self::new(codes::EXCEPTION, error.to_string())
    }
}
