//! Event subscriptions decode typed events from one queue.

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::RngCore;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::address::EventAddress;
use crate::broker::{message_stream, BrokerQueue, ExchangeKind, InboundMessage, QueueOptions};
use crate::envelope::Envelope;
use crate::headers::{self, EventHeader, PROTOCOL_VERSION};
use crate::node::Node;
use crate::serializer;

/// Push-delivery sink bridged over a subscription's queue stream.
#[async_trait]
pub trait EventObserver<E>: Send + Sync + 'static {
    /// One decoded event.
    async fn on_next(&self, event: E);

    /// A message that failed to decode, or a failed queue receive.
    async fn on_error(&self, error: &Error);

    /// The queue closed; no further calls follow.
    async fn on_completed(&self);
}

/// A typed lazy stream of events from one event-address queue.
///
/// Pull-based receives silently drop messages that fail decoding;
/// observer delivery reports them through [`EventObserver::on_error`].
#[derive(Debug)]
pub struct EventSubscription<E> {
    address: EventAddress,
    queue: Arc<dyn BrokerQueue>,
    node: Node,
    disposed: AtomicBool,
    _marker: PhantomData<fn() -> E>,
}

impl<E> EventSubscription<E>
where
    E: DeserializeOwned + Send + 'static,
{
    pub(crate) async fn subscribe(node: Node, address: EventAddress) -> Result<Self, Error> {
        let broker = node.broker();
        broker
            .declare_exchange(address.namespace(), ExchangeKind::Topic, true, false)
            .await?;

        let mut suffix = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut suffix);
        let queue = broker
            .declare_queue(
                &format!("{address}%{}", hex::encode(suffix)),
                QueueOptions {
                    durable: false,
                    exclusive: false,
                    auto_delete: false,
                    args: HashMap::new(),
                },
                address.namespace(),
                address.routing_key(),
            )
            .await?;

        debug!("subscribed to events on {address}");
        Ok(Self {
            address,
            queue,
            node,
            disposed: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    /// The topic filter this subscription listens on.
    #[must_use]
    pub fn address(&self) -> &EventAddress {
        &self.address
    }

    /// Suspends until the next decodable event arrives.
    ///
    /// # Errors
    /// Returns the queue failure; decode failures are dropped.
    pub async fn receive(&self) -> Result<E, Error> {
        loop {
            let message = self.queue.receive().await?;
            match decode(&self.node, message) {
                Ok(event) => return Ok(event),
                Err(error) => debug!("dropping undecodable event on {}: {error}", self.address),
            }
        }
    }

    /// As [`EventSubscription::receive`]; the timeout applies to each
    /// underlying queue receive, so a run of undecodable messages can
    /// exceed the wall clock.
    ///
    /// # Errors
    /// [`crate::broker::QueueError::Timeout`] once one receive times out,
    /// or any other queue failure.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<E, Error> {
        loop {
            let message = self.queue.receive_timeout(timeout).await?;
            match decode(&self.node, message) {
                Ok(event) => return Ok(event),
                Err(error) => debug!("dropping undecodable event on {}: {error}", self.address),
            }
        }
    }

    /// As [`EventSubscription::receive`], failing once the token trips.
    ///
    /// # Errors
    /// [`crate::broker::QueueError::Cancelled`] when cancelled, or any
    /// other queue failure.
    pub async fn receive_until_cancelled(&self, cancel: &CancellationToken) -> Result<E, Error> {
        loop {
            let message = self.queue.receive_until_cancelled(cancel).await?;
            match decode(&self.node, message) {
                Ok(event) => return Ok(event),
                Err(error) => debug!("dropping undecodable event on {}: {error}", self.address),
            }
        }
    }

    /// Pumps the queue into an observer until the queue closes. Decode
    /// and receive failures reach [`EventObserver::on_error`]; disposal
    /// ends the pump with [`EventObserver::on_completed`].
    pub fn observe(&self, observer: Arc<dyn EventObserver<E>>) {
        let node = self.node.clone();
        let mut stream = message_stream(self.queue.clone());
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(message) => match decode::<E>(&node, message) {
                        Ok(event) => observer.on_next(event).await,
                        Err(error) => observer.on_error(&error).await,
                    },
                    Err(queue_error) => observer.on_error(&Error::Queue(queue_error)).await,
                }
            }
            observer.on_completed().await;
        });
    }

    /// Releases the queue consumer. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.dispose().await;
        debug!("event subscription on {} disposed", self.address);
    }
}

/// Runs the decoding pipeline on one delivery: envelope, event header,
/// version, serializer, body.
fn decode<E: DeserializeOwned>(node: &Node, message: InboundMessage) -> Result<E, Error> {
    let envelope = Envelope::from_inbound(message, node.clone());
    let raw = envelope
        .header(headers::EVENT_HEADER)
        .ok_or_else(|| Error::InvalidData("the event header is missing".to_string()))?;
    let header = EventHeader::parse(raw).map_err(|error| Error::InvalidData(error.to_string()))?;
    if header.version != PROTOCOL_VERSION {
        return Err(Error::UnsupportedVersion(header.version));
    }
    let codec = serializer::event_serializer(&header.serializer)
        .ok_or(Error::UnsupportedSerializer(header.serializer))?;
    let value = codec
        .deserialize_event(envelope.body())
        .map_err(|error| Error::InvalidData(error.to_string()))?;
    serde_json::from_value(value).map_err(|error| Error::InvalidData(error.to_string()))
}
