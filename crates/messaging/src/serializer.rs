//! Serializer registries for RPC and event payloads.
//!
//! Both registries are process-wide, keyed by the serializer's declared
//! name, and populated once at startup; dispatch only reads them. The
//! in-memory value model is `serde_json::Value` regardless of the wire
//! format.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::rpc::contract::{MemberResolver, ParameterSpec};
use crate::rpc::request::{RpcRequest, RpcResponse};

/// Errors raised while encoding or decoding payloads.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The member resolver does not know the requested interface or
    /// operation.
    #[error("the interface or operation could not be found")]
    UnknownMember,

    /// The payload does not parse, or an argument does not match its
    /// declared type.
    #[error("{0}")]
    Invalid(String),
}

/// Encodes and decodes RPC requests and responses for one wire format.
pub trait RpcSerializer: Debug + Send + Sync + 'static {
    /// Registry name of this serializer.
    fn name(&self) -> &'static str;

    /// Decodes a request body, binding argument names and types through
    /// the resolver.
    ///
    /// # Errors
    /// [`Error::UnknownMember`] when the resolver cannot place the
    /// request; [`Error::Invalid`] for any other decode failure.
    fn deserialize_request(
        &self,
        body: &Bytes,
        resolver: &dyn MemberResolver,
    ) -> Result<RpcRequest, Error>;

    /// Encodes a request body.
    ///
    /// # Errors
    /// [`Error::Invalid`] when the request does not encode.
    fn serialize_request(&self, request: &RpcRequest) -> Result<Bytes, Error>;

    /// Decodes a response body.
    ///
    /// # Errors
    /// [`Error::Invalid`] when the body does not parse as a response.
    fn deserialize_response(&self, body: &Bytes) -> Result<RpcResponse, Error>;

    /// Encodes a response body.
    ///
    /// # Errors
    /// [`Error::Invalid`] when the response does not encode.
    fn serialize_response(&self, response: &RpcResponse) -> Result<Bytes, Error>;
}

/// Encodes and decodes event payloads for one wire format.
pub trait EventSerializer: Debug + Send + Sync + 'static {
    /// Registry name of this serializer.
    fn name(&self) -> &'static str;

    /// Decodes an event body into the value model.
    ///
    /// # Errors
    /// [`Error::Invalid`] when the body does not parse.
    fn deserialize_event(&self, body: &Bytes) -> Result<Value, Error>;

    /// Encodes an event body.
    ///
    /// # Errors
    /// [`Error::Invalid`] when the value does not encode.
    fn serialize_event(&self, event: &Value) -> Result<Bytes, Error>;
}

type RpcRegistry = RwLock<HashMap<String, Arc<dyn RpcSerializer>>>;
type EventRegistry = RwLock<HashMap<String, Arc<dyn EventSerializer>>>;

static RPC_SERIALIZERS: LazyLock<RpcRegistry> = LazyLock::new(|| RwLock::new(HashMap::new()));
static EVENT_SERIALIZERS: LazyLock<EventRegistry> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Registers an RPC serializer under its declared name, replacing any
/// previous registration of that name.
pub fn register_rpc_serializer(serializer: Arc<dyn RpcSerializer>) {
    RPC_SERIALIZERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(serializer.name().to_string(), serializer);
}

/// Looks up an RPC serializer by name.
#[must_use]
pub fn rpc_serializer(name: &str) -> Option<Arc<dyn RpcSerializer>> {
    RPC_SERIALIZERS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Registers an event serializer under its declared name, replacing any
/// previous registration of that name.
pub fn register_event_serializer(serializer: Arc<dyn EventSerializer>) {
    EVENT_SERIALIZERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(serializer.name().to_string(), serializer);
}

/// Looks up an event serializer by name.
#[must_use]
pub fn event_serializer(name: &str) -> Option<Arc<dyn EventSerializer>> {
    EVENT_SERIALIZERS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Registers the built-in `"json"` and `"cbor"` serializers in both
/// registries. Idempotent; call once at startup.
pub fn register_default_serializers() {
    register_rpc_serializer(Arc::new(JsonSerializer));
    register_rpc_serializer(Arc::new(CborSerializer));
    register_event_serializer(Arc::new(JsonSerializer));
    register_event_serializer(Arc::new(CborSerializer));
}

fn bind_request(request: &RpcRequest, resolver: &dyn MemberResolver) -> Result<(), Error> {
    let signature = resolver
        .resolve(&request.interface, &request.operation)
        .ok_or(Error::UnknownMember)?;
    for parameter in &signature.parameters {
        if let Some(value) = request.arguments.get(&parameter.name) {
            check_argument_type(parameter, value)?;
        }
    }
    Ok(())
}

fn check_argument_type(parameter: &ParameterSpec, value: &Value) -> Result<(), Error> {
    if parameter.optional && value.is_null() {
        return Ok(());
    }
    let matches = match parameter.type_name.as_str() {
        "int32" | "int64" => value.is_i64() || value.is_u64(),
        "float64" => value.is_number(),
        "bool" => value.is_boolean(),
        "string" => value.is_string(),
        // Unrecognised type names pass through untouched.
        _ => true,
    };
    if matches {
        Ok(())
    } else {
        Err(Error::Invalid(format!(
            "the argument {} is not a {}",
            parameter.name, parameter.type_name
        )))
    }
}

/// The `"json"` wire format.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl RpcSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn deserialize_request(
        &self,
        body: &Bytes,
        resolver: &dyn MemberResolver,
    ) -> Result<RpcRequest, Error> {
        let request: RpcRequest =
            serde_json::from_slice(body).map_err(|error| Error::Invalid(error.to_string()))?;
        bind_request(&request, resolver)?;
        Ok(request)
    }

    fn serialize_request(&self, request: &RpcRequest) -> Result<Bytes, Error> {
        serde_json::to_vec(request)
            .map(Bytes::from)
            .map_err(|error| Error::Invalid(error.to_string()))
    }

    fn deserialize_response(&self, body: &Bytes) -> Result<RpcResponse, Error> {
        serde_json::from_slice(body).map_err(|error| Error::Invalid(error.to_string()))
    }

    fn serialize_response(&self, response: &RpcResponse) -> Result<Bytes, Error> {
        serde_json::to_vec(response)
            .map(Bytes::from)
            .map_err(|error| Error::Invalid(error.to_string()))
    }
}

impl EventSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn deserialize_event(&self, body: &Bytes) -> Result<Value, Error> {
        serde_json::from_slice(body).map_err(|error| Error::Invalid(error.to_string()))
    }

    fn serialize_event(&self, event: &Value) -> Result<Bytes, Error> {
        serde_json::to_vec(event)
            .map(Bytes::from)
            .map_err(|error| Error::Invalid(error.to_string()))
    }
}

/// The `"cbor"` wire format.
#[derive(Clone, Copy, Debug, Default)]
pub struct CborSerializer;

impl RpcSerializer for CborSerializer {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn deserialize_request(
        &self,
        body: &Bytes,
        resolver: &dyn MemberResolver,
    ) -> Result<RpcRequest, Error> {
        let request: RpcRequest = ciborium::de::from_reader(body.as_ref())
            .map_err(|error| Error::Invalid(error.to_string()))?;
        bind_request(&request, resolver)?;
        Ok(request)
    }

    fn serialize_request(&self, request: &RpcRequest) -> Result<Bytes, Error> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(request, &mut buffer)
            .map_err(|error| Error::Invalid(error.to_string()))?;
        Ok(Bytes::from(buffer))
    }

    fn deserialize_response(&self, body: &Bytes) -> Result<RpcResponse, Error> {
        ciborium::de::from_reader(body.as_ref()).map_err(|error| Error::Invalid(error.to_string()))
    }

    fn serialize_response(&self, response: &RpcResponse) -> Result<Bytes, Error> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(response, &mut buffer)
            .map_err(|error| Error::Invalid(error.to_string()))?;
        Ok(Bytes::from(buffer))
    }
}

impl EventSerializer for CborSerializer {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn deserialize_event(&self, body: &Bytes) -> Result<Value, Error> {
        ciborium::de::from_reader(body.as_ref()).map_err(|error| Error::Invalid(error.to_string()))
    }

    fn serialize_event(&self, event: &Value) -> Result<Bytes, Error> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(event, &mut buffer)
            .map_err(|error| Error::Invalid(error.to_string()))?;
        Ok(Bytes::from(buffer))
    }
}
