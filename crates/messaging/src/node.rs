//! Nodes host services and own the connection to one broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::address::{EventAddress, ServiceAddress};
use crate::behaviour::ServiceBehaviour;
use crate::broker::{Broker, BrokerError, ExchangeKind, OutboundMessage};
use crate::headers::{self, EventHeader};
use crate::serializer;
use crate::service::{self, Execution, Service, ServiceKind};
use crate::subscription::{self, EventSubscription};

const UNHANDLED_CHANNEL_CAPACITY: usize = 128;

/// Errors raised by node-level publishing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The named serializer is missing from the event registry.
    #[error("unsupported serializer `{0}`")]
    UnsupportedSerializer(String),

    /// The event failed to encode.
    #[error("failed to serialize the event: {0}")]
    Serialize(serializer::Error),

    /// The broker rejected the operation.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// An error that escaped a behaviour or the receive loop itself,
/// broadcast to whoever is supervising the node.
#[derive(Clone, Debug)]
pub struct UnhandledError {
    /// Address of the service the error escaped from.
    pub address: ServiceAddress,

    /// Debug rendering of the behaviour that was dispatching.
    pub behaviour: String,

    /// The error itself; downcast to inspect the concrete kind.
    pub error: Arc<dyn std::error::Error + Send + Sync>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    broker: RwLock<Arc<dyn Broker>>,
    services: Mutex<Vec<Service>>,
    unhandled_tx: broadcast::Sender<UnhandledError>,
}

/// A host for services, subscriptions, and replies over one broker.
///
/// Cheap to clone; all clones share the same broker connection and
/// service set.
#[derive(Clone, Debug)]
pub struct Node {
    inner: Arc<Inner>,
}

impl Node {
    /// Creates a node over a connected broker.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        let (unhandled_tx, _) = broadcast::channel(UNHANDLED_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                broker: RwLock::new(broker),
                services: Mutex::new(Vec::new()),
                unhandled_tx,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    /// The broker currently in use.
    #[must_use]
    pub fn broker(&self) -> Arc<dyn Broker> {
        self.inner
            .broker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Declares broker resources for a service, starts its receive loop,
    /// and tracks it for failover.
    ///
    /// # Errors
    /// Returns the declaration failure; the service is not tracked on
    /// failure.
    pub async fn host_service(
        &self,
        address: ServiceAddress,
        kind: ServiceKind,
        execution: Execution,
        behaviour: Arc<dyn ServiceBehaviour>,
    ) -> Result<Service, service::Error> {
        let service = Service::new(address, kind, execution, behaviour, self);
        service.setup().await?;
        self.inner
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(service.clone());
        Ok(service)
    }

    /// Opens a typed event subscription on an event address.
    ///
    /// # Errors
    /// Returns the underlying declaration failure.
    pub async fn subscribe<E>(&self, address: EventAddress) -> Result<EventSubscription<E>, subscription::Error>
    where
        E: serde::de::DeserializeOwned + Send + 'static,
    {
        EventSubscription::subscribe(self.clone(), address).await
    }

    /// Publishes one event to an event address, stamped with the current
    /// protocol version and the named serializer.
    ///
    /// # Errors
    /// [`Error::UnsupportedSerializer`] for unregistered serializer
    /// names, otherwise encode or broker failures.
    pub async fn publish<E: Serialize>(
        &self,
        address: &EventAddress,
        serializer_name: &str,
        event: &E,
    ) -> Result<(), Error> {
        let codec = serializer::event_serializer(serializer_name)
            .ok_or_else(|| Error::UnsupportedSerializer(serializer_name.to_string()))?;
        let value = serde_json::to_value(event)
            .map_err(|error| Error::Serialize(serializer::Error::Invalid(error.to_string())))?;
        let body = codec.serialize_event(&value).map_err(Error::Serialize)?;

        let mut message_headers = HashMap::new();
        message_headers.insert(
            headers::EVENT_HEADER.to_string(),
            EventHeader::new(serializer_name).encode(),
        );

        let broker = self.broker();
        broker
            .declare_exchange(address.namespace(), ExchangeKind::Topic, true, false)
            .await?;
        broker
            .publish(
                address.namespace(),
                address.routing_key(),
                OutboundMessage {
                    correlation_id: None,
                    reply_to: None,
                    headers: message_headers,
                    body,
                },
            )
            .await?;
        Ok(())
    }

    /// Publishes a reply to the default exchange, correlated to the
    /// request id.
    ///
    /// # Errors
    /// Returns the broker publish failure.
    pub async fn reply(
        &self,
        reply_to: &str,
        correlation_id: Uuid,
        reply_headers: HashMap<String, Bytes>,
        body: Bytes,
    ) -> Result<(), BrokerError> {
        self.broker()
            .publish(
                "",
                reply_to,
                OutboundMessage {
                    correlation_id: Some(correlation_id),
                    reply_to: None,
                    headers: reply_headers,
                    body,
                },
            )
            .await
    }

    /// Points the node at a new broker and re-declares every hosted
    /// service against it.
    ///
    /// # Errors
    /// Returns the first re-declaration failure; remaining services are
    /// left on the old queue state until retried.
    pub async fn failover(&self, new_broker: Arc<dyn Broker>) -> Result<(), service::Error> {
        debug!("failing node over to a new broker");
        *self
            .inner
            .broker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = new_broker.clone();
        let services: Vec<Service> = self
            .inner
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for service in services {
            service.resetup(new_broker.clone()).await?;
        }
        Ok(())
    }

    /// Subscribes to errors escaping behaviours and receive loops.
    #[must_use]
    pub fn unhandled_errors(&self) -> broadcast::Receiver<UnhandledError> {
        self.inner.unhandled_tx.subscribe()
    }

    /// Disposes every hosted service. Idempotent per service.
    pub async fn dispose(&self) {
        let services: Vec<Service> = self
            .inner
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for service in services {
            service.dispose().await;
        }
    }

    pub(crate) fn report_unhandled(&self, error: UnhandledError) {
        warn!(
            "unhandled error in service {}: {}",
            error.address, error.error
        );
        let _ = self.inner.unhandled_tx.send(error);
    }
}
