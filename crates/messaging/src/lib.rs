//! Services, RPC, and events layered over a topic-based message broker.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Addresses name services and event topics as `namespace:routing-key`.
pub mod address;

/// Behaviours consume decoded envelopes on behalf of a service.
pub mod behaviour;

/// Broker adapter traits consumed by the core.
pub mod broker;

/// Envelopes carry one decoded inbound message through dispatch.
pub mod envelope;

/// Versioned ASCII header lines for RPC and event messages.
pub mod headers;

/// Nodes host services and own the connection to one broker.
pub mod node;

/// RPC dispatch from interface contracts to handler invokers.
pub mod rpc;

/// Serializer registries for RPC and event payloads.
pub mod serializer;

/// Services bind a queue to a behaviour and run the receive loop.
pub mod service;

/// Event subscriptions decode typed events from one queue.
pub mod subscription;

pub use address::{EventAddress, ServiceAddress};
pub use behaviour::ServiceBehaviour;
pub use broker::{Broker, BrokerQueue, InboundMessage, OutboundMessage};
pub use envelope::Envelope;
pub use node::{Node, UnhandledError};
pub use rpc::RpcBehaviour;
pub use service::{Execution, Service, ServiceKind};
pub use subscription::EventSubscription;
