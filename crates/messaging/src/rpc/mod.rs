//! RPC dispatch from interface contracts to handler invokers.
//!
//! An [`RpcBehaviour`] owns a case-insensitive registry of interface
//! bindings and implements [`ServiceBehaviour`] by parsing versioned RPC
//! envelopes, routing single-call requests through the bound operation
//! descriptors, and replying over the envelope's originating node.

/// Interface contracts and operation descriptors.
pub mod contract;

mod error;

/// The built-in `IInterfaceQuery001` contract.
pub mod introspection;

/// Request and response payloads.
pub mod request;

pub use error::Error;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::behaviour::{HandlerError, ServiceBehaviour};
use crate::envelope::Envelope;
use crate::headers::{self, RpcHeader, RpcMessageKind, PROTOCOL_VERSION};
use crate::serializer;

use contract::{InterfaceContract, MemberResolver, MemberSignature, OperationContract, OperationKind};
use introspection::InterfaceDescription;
use request::{codes, RpcRequest, RpcResponse};

/// One bound interface: the contract plus its memoized introspection
/// descriptor.
#[derive(Debug)]
pub(crate) struct Binding {
    contract: Arc<InterfaceContract>,
    descriptor: OnceLock<Arc<InterfaceDescription>>,
}

impl Binding {
    fn describe(&self) -> Arc<InterfaceDescription> {
        self.descriptor
            .get_or_init(|| Arc::new(InterfaceDescription::from_contract(&self.contract)))
            .clone()
    }
}

/// Registry of bindings keyed by ASCII-lowercased interface name. One
/// mutex guards binds and introspection reads alike.
#[derive(Debug, Default)]
pub(crate) struct BindingSet {
    inner: Mutex<HashMap<String, Arc<Binding>>>,
}

impl BindingSet {
    fn insert(&self, contract: InterfaceContract) -> Result<(), Error> {
        let key = contract.name().to_ascii_lowercase();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.contains_key(&key) {
            return Err(Error::AlreadyBound(contract.name().to_string()));
        }
        inner.insert(
            key,
            Arc::new(Binding {
                contract: Arc::new(contract),
                descriptor: OnceLock::new(),
            }),
        );
        Ok(())
    }

    /// Unconditional insert for the auto-bound query contract.
    fn insert_builtin(&self, contract: InterfaceContract) {
        let key = contract.name().to_ascii_lowercase();
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                Arc::new(Binding {
                    contract: Arc::new(contract),
                    descriptor: OnceLock::new(),
                }),
            );
    }

    fn get(&self, interface: &str) -> Option<Arc<Binding>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&interface.to_ascii_lowercase())
            .cloned()
    }

    /// Declared names of all introspectable bindings, sorted.
    pub(crate) fn introspectable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|binding| binding.contract.allow_introspection())
            .map(|binding| binding.contract.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// The memoized descriptor for one introspectable binding; hidden and
    /// unbound interfaces are indistinguishable.
    pub(crate) fn describe(&self, interface: &str) -> Option<Arc<InterfaceDescription>> {
        let binding = self.get(interface)?;
        binding
            .contract
            .allow_introspection()
            .then(|| binding.describe())
    }
}

impl MemberResolver for BindingSet {
    fn resolve(&self, interface: &str, operation: &str) -> Option<MemberSignature> {
        let binding = self.get(interface)?;
        binding
            .contract
            .operation(operation)
            .map(OperationContract::signature)
    }
}

/// A behaviour dispatching RPC envelopes to bound interface contracts.
#[derive(Clone, Debug)]
pub struct RpcBehaviour {
    bindings: Arc<BindingSet>,
}

impl Default for RpcBehaviour {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcBehaviour {
    /// Creates a behaviour with the introspection contract pre-bound.
    #[must_use]
    pub fn new() -> Self {
        let bindings = Arc::new(BindingSet::default());
        bindings.insert_builtin(introspection::contract(Arc::downgrade(&bindings)));
        Self { bindings }
    }

    /// Binds one interface contract.
    ///
    /// # Errors
    /// [`Error::AlreadyBound`] when an interface with the same
    /// case-folded name is already bound.
    pub fn bind(&self, contract: InterfaceContract) -> Result<(), Error> {
        debug!("binding rpc interface {}", contract.name());
        self.bindings.insert(contract)
    }

    /// Binds several contracts, stopping at the first failure.
    ///
    /// # Errors
    /// As [`RpcBehaviour::bind`].
    pub fn bind_many<I>(&self, contracts: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = InterfaceContract>,
    {
        for contract in contracts {
            self.bind(contract)?;
        }
        Ok(())
    }

    async fn dispatch(&self, envelope: Envelope) -> Result<(), Error> {
        if envelope.id().is_nil() {
            return Err(Error::InvalidRequest(
                "the envelope has no reply identifier".to_string(),
            ));
        }
        let raw = envelope.header(headers::RPC_HEADER).ok_or_else(|| {
            Error::InvalidRequest("the rpc header is missing".to_string())
        })?;
        let header =
            RpcHeader::parse(raw).map_err(|error| Error::InvalidRequest(error.to_string()))?;
        if header.version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion(header.version));
        }
        if header.kind != RpcMessageKind::Single {
            return Err(Error::NotImplemented(
                "batched rpc is not supported".to_string(),
            ));
        }
        let codec = serializer::rpc_serializer(&header.serializer)
            .ok_or_else(|| Error::UnsupportedSerializer(header.serializer.clone()))?;

        let (response, no_reply) =
            match codec.deserialize_request(envelope.body(), self.bindings.as_ref()) {
                Err(serializer::Error::UnknownMember) => (member_not_found(), false),
                Err(serializer::Error::Invalid(detail)) => (
                    RpcResponse::error(
                        codes::BAD_REQUEST,
                        format!("The request format is invalid: {detail}"),
                    ),
                    false,
                ),
                Ok(request) => match self.lookup(&request) {
                    None => (member_not_found(), false),
                    Some(operation) => (
                        invoke_operation(&operation, request.arguments).await,
                        operation.signature().no_reply,
                    ),
                },
            };

        if no_reply {
            return Ok(());
        }

        let body = codec
            .serialize_response(&response)
            .map_err(Error::SerializeReply)?;
        let mut reply_headers = HashMap::new();
        reply_headers.insert(
            headers::RPC_HEADER.to_string(),
            RpcHeader::single(&header.serializer).encode(),
        );
        envelope
            .node()
            .reply(envelope.reply_to(), envelope.id(), reply_headers, body)
            .await?;
        Ok(())
    }

    fn lookup(&self, request: &RpcRequest) -> Option<OperationContract> {
        let binding = self.bindings.get(&request.interface)?;
        binding.contract.operation(&request.operation).cloned()
    }
}

#[async_trait]
impl ServiceBehaviour for RpcBehaviour {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.dispatch(envelope).await.map_err(Into::into)
    }
}

fn member_not_found() -> RpcResponse {
    RpcResponse::error(
        codes::NOT_FOUND,
        "The interface or operation could not be found",
    )
}

/// Runs one resolved member per the invocation rules: gather declared
/// parameters by name, reject property writes, and convert faults into
/// coded error responses.
async fn invoke_operation(
    operation: &OperationContract,
    arguments: Map<String, Value>,
) -> RpcResponse {
    let signature = operation.signature();
    match signature.kind {
        OperationKind::Property => {
            if arguments.contains_key("Property") {
                return RpcResponse::error(
                    codes::NOT_IMPLEMENTED,
                    "Property writes are not supported",
                );
            }
            match operation.invoke(Vec::new()).await {
                Ok(value) => RpcResponse::ok(value),
                Err(fault) => fault.into(),
            }
        }
        OperationKind::Method => {
            let mut values = Vec::with_capacity(signature.parameters.len());
            for parameter in &signature.parameters {
                match arguments.get(&parameter.name) {
                    Some(value) => values.push(value.clone()),
                    None if parameter.optional => {
                        values.push(parameter.default.clone().unwrap_or(Value::Null));
                    }
                    None => {
                        return RpcResponse::error(
                            codes::BAD_REQUEST,
                            format!("The argument {} is not optional", parameter.name),
                        );
                    }
                }
            }
            match operation.invoke(values).await {
                Ok(_) if signature.return_type.is_none() => RpcResponse::ok(Value::Null),
                Ok(value) => RpcResponse::ok(value),
                Err(fault) => fault.into(),
            }
        }
    }
}
