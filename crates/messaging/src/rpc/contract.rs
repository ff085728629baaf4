//! Interface contracts: the hand-written replacement for reflective
//! dispatch.
//!
//! A contract carries one operation descriptor per callable member. Each
//! descriptor owns a boxed async invoker closing over the handler object,
//! so dispatch is a table lookup instead of runtime type inspection.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::request::Fault;

/// Boxed future produced by an invoker.
pub type BoxedInvokeFuture = Pin<Box<dyn Future<Output = Result<Value, Fault>> + Send>>;

/// Type-erased async invoker; receives argument values in declared
/// parameter order.
pub type Invoker = Arc<dyn Fn(Vec<Value>) -> BoxedInvokeFuture + Send + Sync>;

/// The two member kinds a contract can expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// A callable method with declared parameters.
    Method,

    /// A readable property getter; writes are rejected at dispatch.
    Property,
}

/// One declared parameter of a method.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSpec {
    /// Parameter name; arguments are gathered by this name.
    pub name: String,

    /// Declared type name, surfaced through introspection and used for
    /// argument validation during parsing.
    pub type_name: String,

    /// Whether the caller may omit the argument.
    pub optional: bool,

    /// Value substituted when an optional argument is omitted.
    pub default: Option<Value>,
}

impl ParameterSpec {
    /// A parameter the caller must supply.
    pub fn required<N, T>(name: N, type_name: T) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            optional: false,
            default: None,
        }
    }

    /// A parameter the caller may omit; `default` stands in when omitted.
    pub fn optional<N, T>(name: N, type_name: T, default: Value) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            optional: true,
            default: Some(default),
        }
    }
}

/// The signature half of an operation descriptor, handed to serializers
/// so argument names and types can be bound during parsing.
#[derive(Clone, Debug)]
pub struct MemberSignature {
    /// Member kind.
    pub kind: OperationKind,

    /// Declared parameters in order.
    pub parameters: Vec<ParameterSpec>,

    /// Declared return type; `None` means the operation produces no value.
    pub return_type: Option<String>,

    /// Whether the operation's result is withheld from the caller.
    pub no_reply: bool,
}

/// Resolves `(interface, operation)` pairs to member signatures during
/// request parsing.
pub trait MemberResolver: Send + Sync {
    /// Returns the member's signature, or `None` when the interface or
    /// operation is not bound.
    fn resolve(&self, interface: &str, operation: &str) -> Option<MemberSignature>;
}

/// One callable member of a bound interface.
#[derive(Clone)]
pub struct OperationContract {
    pub(crate) name: String,
    pub(crate) kind: OperationKind,
    pub(crate) parameters: Vec<ParameterSpec>,
    pub(crate) return_type: Option<String>,
    pub(crate) no_reply: bool,
    pub(crate) allow_introspection: bool,
    invoker: Invoker,
}

impl OperationContract {
    /// A method returning a value of the declared type.
    pub fn method<N, F, Fut>(
        name: N,
        parameters: Vec<ParameterSpec>,
        return_type: &str,
        handler: F,
    ) -> Self
    where
        N: Into<String>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: OperationKind::Method,
            parameters,
            return_type: Some(return_type.to_string()),
            no_reply: false,
            allow_introspection: true,
            invoker: Arc::new(move |arguments| Box::pin(handler(arguments))),
        }
    }

    /// A method declared to produce no value; callers receive a null
    /// success response.
    pub fn void_method<N, F, Fut>(name: N, parameters: Vec<ParameterSpec>, handler: F) -> Self
    where
        N: Into<String>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: OperationKind::Method,
            parameters,
            return_type: None,
            no_reply: false,
            allow_introspection: true,
            invoker: Arc::new(move |arguments| Box::pin(handler(arguments))),
        }
    }

    /// A readable property getter.
    pub fn property<N, F, Fut>(name: N, type_name: &str, handler: F) -> Self
    where
        N: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: OperationKind::Property,
            parameters: Vec::new(),
            return_type: Some(type_name.to_string()),
            no_reply: false,
            allow_introspection: true,
            invoker: Arc::new(move |_| Box::pin(handler())),
        }
    }

    /// Marks the operation no-reply: the server never publishes a
    /// response for it.
    #[must_use]
    pub fn no_reply(mut self) -> Self {
        self.no_reply = true;
        self
    }

    /// Hides the operation from introspection descriptors.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.allow_introspection = false;
        self
    }

    /// The operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The signature half of this descriptor.
    #[must_use]
    pub fn signature(&self) -> MemberSignature {
        MemberSignature {
            kind: self.kind,
            parameters: self.parameters.clone(),
            return_type: self.return_type.clone(),
            no_reply: self.no_reply,
        }
    }

    /// Invokes the member with argument values in declared order.
    pub fn invoke(&self, arguments: Vec<Value>) -> BoxedInvokeFuture {
        (self.invoker)(arguments)
    }
}

impl fmt::Debug for OperationContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContract")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parameters", &self.parameters)
            .field("return_type", &self.return_type)
            .field("no_reply", &self.no_reply)
            .field("allow_introspection", &self.allow_introspection)
            .finish_non_exhaustive()
    }
}

/// A named interface contract: the unit bound into an [`RpcBehaviour`].
///
/// [`RpcBehaviour`]: super::RpcBehaviour
#[derive(Clone, Debug)]
pub struct InterfaceContract {
    name: String,
    allow_introspection: bool,
    operations: Vec<OperationContract>,
}

impl InterfaceContract {
    /// Starts building a contract with the given interface name.
    pub fn builder<N: Into<String>>(name: N) -> ContractBuilder {
        ContractBuilder {
            name: name.into(),
            allow_introspection: true,
            operations: Vec::new(),
        }
    }

    /// The interface name as declared (original casing).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the binding is exposed through the introspection contract.
    #[must_use]
    pub const fn allow_introspection(&self) -> bool {
        self.allow_introspection
    }

    /// All declared operations.
    #[must_use]
    pub fn operations(&self) -> &[OperationContract] {
        &self.operations
    }

    /// Looks up one operation by exact name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&OperationContract> {
        self.operations.iter().find(|op| op.name == name)
    }
}

/// Builder for [`InterfaceContract`].
#[derive(Debug)]
pub struct ContractBuilder {
    name: String,
    allow_introspection: bool,
    operations: Vec<OperationContract>,
}

impl ContractBuilder {
    /// Sets whether the whole binding is listed by introspection.
    #[must_use]
    pub fn allow_introspection(mut self, allow: bool) -> Self {
        self.allow_introspection = allow;
        self
    }

    /// Adds a fully built operation descriptor.
    #[must_use]
    pub fn operation(mut self, operation: OperationContract) -> Self {
        self.operations.push(operation);
        self
    }

    /// Adds a value-returning method.
    #[must_use]
    pub fn method<N, F, Fut>(
        self,
        name: N,
        parameters: Vec<ParameterSpec>,
        return_type: &str,
        handler: F,
    ) -> Self
    where
        N: Into<String>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        self.operation(OperationContract::method(name, parameters, return_type, handler))
    }

    /// Adds a readable property.
    #[must_use]
    pub fn property<N, F, Fut>(self, name: N, type_name: &str, handler: F) -> Self
    where
        N: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        self.operation(OperationContract::property(name, type_name, handler))
    }

    /// Finishes the contract.
    #[must_use]
    pub fn build(self) -> InterfaceContract {
        InterfaceContract {
            name: self.name,
            allow_introspection: self.allow_introspection,
            operations: self.operations,
        }
    }
}

/// Decodes one positional argument inside an invoker, mapping conversion
/// failures to a `"BadRequest"` fault naming the parameter.
///
/// # Errors
/// Returns a fault when the value does not convert to `T`.
pub fn argument<T: DeserializeOwned>(values: &[Value], index: usize, name: &str) -> Result<T, Fault> {
    let value = values.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|error| Fault::bad_request(format!("The argument {name} is invalid: {error}")))
}
