//! Broker adapter traits consumed by the core.
//!
//! The broker client itself (connections, channels, wire framing) lives
//! behind these traits; the core only declares resources, receives inbound
//! messages, and publishes.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Errors raised by broker declarations and publishes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// A queue is exclusively held by another consumer.
    #[error("queue `{0}` is exclusively locked")]
    ResourceLocked(String),

    /// An exchange was re-declared with different attributes.
    #[error("exchange `{0}` already exists with different attributes")]
    ExchangeMismatch(String),

    /// The named exchange does not exist.
    #[error("exchange `{0}` does not exist")]
    UnknownExchange(String),

    /// The broker connection is gone.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),
}

/// Errors raised by queue receives.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The receive deadline elapsed.
    #[error("receive timed out")]
    Timeout,

    /// The receive was cancelled, either by the caller's token or by
    /// disposing the queue mid-receive.
    #[error("receive cancelled")]
    Cancelled,

    /// The queue consumer is gone and will never yield another message.
    #[error("queue closed")]
    Closed,

    /// The broker connection failed under the consumer.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),
}

/// The kind of a declared exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Routes on routing-key patterns with `*`/`#` wildcards.
    Topic,
}

/// Declaration attributes for a queue.
#[derive(Clone, Debug, Default)]
pub struct QueueOptions {
    /// Whether the queue survives broker restarts.
    pub durable: bool,

    /// Whether the queue is owned by a single consumer; a second exclusive
    /// declaration of the same name fails with [`BrokerError::ResourceLocked`].
    pub exclusive: bool,

    /// Whether the broker deletes the queue once the last consumer leaves.
    pub auto_delete: bool,

    /// Broker-specific declaration arguments, passed through verbatim.
    pub args: HashMap<String, String>,
}

/// One raw broker delivery, before any decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Broker-assigned delivery tag.
    pub delivery_tag: u64,

    /// Correlation id of the message, if any.
    pub correlation_id: Option<Uuid>,

    /// Queue to route a reply to, if the sender expects one.
    pub reply_to: Option<String>,

    /// Application headers keyed by name.
    pub headers: HashMap<String, Bytes>,

    /// Opaque payload.
    pub body: Bytes,
}

/// One message handed to the broker for publishing.
#[derive(Clone, Debug, Default)]
pub struct OutboundMessage {
    /// Correlation id to stamp on the delivery.
    pub correlation_id: Option<Uuid>,

    /// Queue the receiver should route a reply to.
    pub reply_to: Option<String>,

    /// Application headers keyed by name.
    pub headers: HashMap<String, Bytes>,

    /// Opaque payload.
    pub body: Bytes,
}

/// A connected broker: declares resources and publishes messages.
#[async_trait]
pub trait Broker: Debug + Send + Sync + 'static {
    /// Declares an exchange, idempotently for identical attributes.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
        auto_delete: bool,
    ) -> Result<(), BrokerError>;

    /// Declares a queue bound to `(namespace, routing_key)` and returns the
    /// consuming handle.
    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
        namespace: &str,
        routing_key: &str,
    ) -> Result<Arc<dyn BrokerQueue>, BrokerError>;

    /// Publishes a message to an exchange. The empty exchange name is the
    /// default exchange: the routing key is taken as a queue name.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError>;
}

/// A cancellable, timed source of inbound messages from one queue.
#[async_trait]
pub trait BrokerQueue: Debug + Send + Sync + 'static {
    /// The broker-side queue name.
    fn name(&self) -> &str;

    /// Suspends until the next message arrives.
    async fn receive(&self) -> Result<InboundMessage, QueueError>;

    /// Adds another `(namespace, routing_key)` binding to this queue;
    /// idempotent for identical keys.
    async fn bind(&self, namespace: &str, routing_key: &str) -> Result<(), BrokerError>;

    /// Releases the consumer and cancels outstanding receives with
    /// [`QueueError::Cancelled`]. Idempotent.
    async fn dispose(&self);

    /// As [`BrokerQueue::receive`], failing with [`QueueError::Timeout`]
    /// once the deadline elapses.
    async fn receive_timeout(&self, timeout: Duration) -> Result<InboundMessage, QueueError> {
        tokio::time::timeout(timeout, self.receive())
            .await
            .unwrap_or(Err(QueueError::Timeout))
    }

    /// As [`BrokerQueue::receive`], failing with [`QueueError::Cancelled`]
    /// once the token trips.
    async fn receive_until_cancelled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InboundMessage, QueueError> {
        cancel
            .run_until_cancelled(self.receive())
            .await
            .unwrap_or(Err(QueueError::Cancelled))
    }
}

/// An infinite, non-restartable stream over a queue's messages.
///
/// The stream ends when the queue is disposed; receive failures other than
/// cancellation are yielded as `Err` items.
#[must_use]
pub fn message_stream(
    queue: Arc<dyn BrokerQueue>,
) -> BoxStream<'static, Result<InboundMessage, QueueError>> {
    Box::pin(futures::stream::unfold(queue, |queue| async move {
        match queue.receive().await {
            Ok(message) => Some((Ok(message), queue)),
            Err(QueueError::Cancelled | QueueError::Closed) => None,
            Err(error) => Some((Err(error), queue)),
        }
    }))
}
