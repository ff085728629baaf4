//! Queue state and the consuming handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use trellis_messaging::broker::{BrokerError, BrokerQueue, InboundMessage, QueueError};

use crate::BrokerState;

/// Shared state of one declared queue. Competing consumers share the
/// receiver behind a mutex, which is what spreads deliveries across the
/// consumers of a balanced queue.
pub(crate) struct QueueState {
    pub name: String,
    pub exclusive: bool,
    pub tx: mpsc::UnboundedSender<InboundMessage>,
    pub rx: Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    pub consumers: AtomicUsize,
}

impl QueueState {
    pub(crate) fn new(name: String, exclusive: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            exclusive,
            tx,
            rx: Mutex::new(rx),
            consumers: AtomicUsize::new(1),
        }
    }
}

impl fmt::Debug for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueState")
            .field("name", &self.name)
            .field("exclusive", &self.exclusive)
            .field("consumers", &self.consumers.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// One consumer of one queue. Disposal cancels outstanding receives and
/// releases the broker-side queue once the last consumer is gone.
#[derive(Debug)]
pub struct MemoryQueue {
    state: Arc<QueueState>,
    broker: Weak<BrokerState>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl MemoryQueue {
    pub(crate) fn new(state: Arc<QueueState>, broker: Weak<BrokerState>) -> Self {
        Self {
            state,
            broker,
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BrokerQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn receive(&self) -> Result<InboundMessage, QueueError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        tokio::select! {
            () = self.cancel.cancelled() => Err(QueueError::Cancelled),
            message = async { self.state.rx.lock().await.recv().await } => {
                message.ok_or(QueueError::Closed)
            }
        }
    }

    async fn bind(&self, namespace: &str, routing_key: &str) -> Result<(), BrokerError> {
        let broker = self
            .broker
            .upgrade()
            .ok_or_else(|| BrokerError::ConnectionLost("broker dropped".to_string()))?;
        broker.bind_queue(namespace, routing_key, &self.state.name)
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if self.state.consumers.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(broker) = self.broker.upgrade() {
                broker.remove_queue(&self.state.name);
            }
        }
        debug!("queue {} consumer disposed", self.state.name);
    }
}
