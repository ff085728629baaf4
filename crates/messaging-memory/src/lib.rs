//! In-process broker backend for `trellis-messaging`.
//!
//! Implements the broker adapter traits over tokio channels: topic
//! exchanges with `*`/`#` pattern matching, named queues with exclusive
//! and work-sharing semantics, and the default exchange routing replies
//! straight to queues by name. Intended for tests and local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod exchange;
mod queue;

pub use queue::MemoryQueue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use trellis_messaging::broker::{
    Broker, BrokerError, BrokerQueue, ExchangeKind, InboundMessage, OutboundMessage, QueueOptions,
};

use exchange::ExchangeState;
use queue::QueueState;

#[derive(Debug)]
pub(crate) struct BrokerState {
    exchanges: Mutex<HashMap<String, ExchangeState>>,
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    next_delivery_tag: AtomicU64,
}

impl BrokerState {
    pub(crate) fn bind_queue(
        &self,
        namespace: &str,
        routing_key: &str,
        queue: &str,
    ) -> Result<(), BrokerError> {
        let mut exchanges = self
            .exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let exchange = exchanges
            .get_mut(namespace)
            .ok_or_else(|| BrokerError::UnknownExchange(namespace.to_string()))?;
        exchange.bind(routing_key, queue);
        Ok(())
    }

    pub(crate) fn remove_queue(&self, name: &str) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        let mut exchanges = self
            .exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for exchange in exchanges.values_mut() {
            exchange.bindings.retain(|binding| binding.queue != name);
        }
    }
}

/// An in-process broker; clones share the same exchanges and queues.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    inner: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerState {
                exchanges: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                next_delivery_tag: AtomicU64::new(1),
            }),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
        auto_delete: bool,
    ) -> Result<(), BrokerError> {
        let mut exchanges = self
            .inner
            .exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = exchanges.get(name) {
            if existing.kind != kind
                || existing.durable != durable
                || existing.auto_delete != auto_delete
            {
                return Err(BrokerError::ExchangeMismatch(name.to_string()));
            }
            return Ok(());
        }
        exchanges.insert(
            name.to_string(),
            ExchangeState::new(kind, durable, auto_delete),
        );
        debug!("declared exchange {name}");
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
        namespace: &str,
        routing_key: &str,
    ) -> Result<Arc<dyn BrokerQueue>, BrokerError> {
        let state = {
            let mut queues = self
                .inner
                .queues
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = queues.get(name) {
                if existing.exclusive || options.exclusive {
                    return Err(BrokerError::ResourceLocked(name.to_string()));
                }
                existing.consumers.fetch_add(1, Ordering::SeqCst);
                existing.clone()
            } else {
                let state = Arc::new(QueueState::new(name.to_string(), options.exclusive));
                queues.insert(name.to_string(), state.clone());
                state
            }
        };

        self.inner.bind_queue(namespace, routing_key, name)?;

        debug!("declared queue {name} bound to {namespace}:{routing_key}");
        Ok(Arc::new(MemoryQueue::new(
            state,
            Arc::downgrade(&self.inner),
        )))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let inbound = InboundMessage {
            delivery_tag: self.inner.next_delivery_tag.fetch_add(1, Ordering::SeqCst),
            correlation_id: message.correlation_id,
            reply_to: message.reply_to,
            headers: message.headers,
            body: message.body,
        };

        if exchange.is_empty() {
            // Default exchange: the routing key names a queue directly;
            // unroutable messages are dropped, as without `mandatory`.
            let queues = self
                .inner
                .queues
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(queue) = queues.get(routing_key) {
                let _ = queue.tx.send(inbound);
            }
            return Ok(());
        }

        let targets: Vec<String> = {
            let exchanges = self
                .inner
                .exchanges
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let state = exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
            state
                .route(routing_key)
                .into_iter()
                .map(String::from)
                .collect()
        };

        let queues = self
            .inner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for target in targets {
            if let Some(queue) = queues.get(&target) {
                let _ = queue.tx.send(inbound.clone());
            }
        }
        Ok(())
    }
}
