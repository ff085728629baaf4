//! Services bind a queue to a behaviour and run the receive loop.

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::address::ServiceAddress;
use crate::behaviour::ServiceBehaviour;
use crate::broker::{Broker, BrokerError, BrokerQueue, ExchangeKind, QueueError, QueueOptions};
use crate::envelope::Envelope;
use crate::node::{self, Node, UnhandledError};

/// How a service's queue is shared among nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    /// One exclusive queue named after the address; a second declaration
    /// of the same address fails. This is the uniqueness mechanism.
    Singleton,

    /// A private randomly suffixed queue per subscriber; every delivery
    /// is copied to all subscribers of the address.
    Fanout,

    /// One shared queue named after the address; the broker spreads
    /// deliveries across its consumers.
    Balanced,
}

/// How handlers are scheduled relative to the receive loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Execution {
    /// Await each handler before dequeuing the next message.
    Serial,

    /// Spawn each handler and dequeue immediately; completion order is
    /// unconstrained.
    Parallel,
}

#[derive(Debug)]
struct State {
    broker: Arc<dyn Broker>,
    queue: Option<Arc<dyn BrokerQueue>>,
    loop_cancel: CancellationToken,
    is_setup: bool,
}

#[derive(Debug)]
struct Inner {
    address: ServiceAddress,
    kind: ServiceKind,
    execution: Execution,
    behaviour: Arc<dyn ServiceBehaviour>,
    node: Weak<node::Inner>,
    state: Mutex<State>,
    disposed: AtomicBool,
    tracker: TaskTracker,
}

/// A queue-bound message handler with a managed lifecycle:
/// `setup` declares broker resources and starts the receive loop,
/// `resetup` re-declares against a new broker after failover, and
/// `dispose` releases everything.
#[derive(Clone, Debug)]
pub struct Service {
    inner: Arc<Inner>,
}

impl Service {
    pub(crate) fn new(
        address: ServiceAddress,
        kind: ServiceKind,
        execution: Execution,
        behaviour: Arc<dyn ServiceBehaviour>,
        node: &Node,
    ) -> Self {
        let broker = node.broker();
        Self {
            inner: Arc::new(Inner {
                address,
                kind,
                execution,
                behaviour,
                node: node.downgrade(),
                state: Mutex::new(State {
                    broker,
                    queue: None,
                    loop_cancel: CancellationToken::new(),
                    is_setup: false,
                }),
                disposed: AtomicBool::new(false),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// The address this service answers on.
    #[must_use]
    pub fn address(&self) -> &ServiceAddress {
        &self.inner.address
    }

    /// The queue-sharing kind.
    #[must_use]
    pub fn kind(&self) -> ServiceKind {
        self.inner.kind
    }

    /// The handler scheduling strategy.
    #[must_use]
    pub fn execution(&self) -> Execution {
        self.inner.execution
    }

    /// Declares the exchange and queue for this service and spawns the
    /// receive loop.
    ///
    /// # Errors
    /// [`Error::AlreadySetup`] without an intervening dispose, or the
    /// broker declaration failure.
    pub async fn setup(&self) -> Result<(), Error> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        let (broker, cancel) = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if state.is_setup {
                return Err(Error::AlreadySetup);
            }
            state.is_setup = true;
            state.loop_cancel = CancellationToken::new();
            (state.broker.clone(), state.loop_cancel.clone())
        };

        let queue = match self.declare(broker.as_ref()).await {
            Ok(queue) => queue,
            Err(error) => {
                self.inner
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_setup = false;
                return Err(error.into());
            }
        };

        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue = Some(queue.clone());

        debug!(
            "service {} consuming from queue {}",
            self.inner.address,
            queue.name()
        );
        self.inner.tracker.spawn(run_loop(
            self.inner.address.clone(),
            self.inner.execution,
            self.inner.behaviour.clone(),
            queue,
            cancel,
            self.inner.node.clone(),
            self.inner.tracker.clone(),
        ));
        Ok(())
    }

    /// Cancels the loop, releases the old queue, and sets up again on a
    /// new broker. In-flight parallel handlers finish independently.
    ///
    /// # Errors
    /// As [`Service::setup`].
    pub async fn resetup(&self, new_broker: Arc<dyn Broker>) -> Result<(), Error> {
        let old_queue = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.loop_cancel.cancel();
            state.broker = new_broker;
            state.is_setup = false;
            state.queue.take()
        };
        if let Some(queue) = old_queue {
            queue.dispose().await;
        }
        self.setup().await
    }

    /// Cancels the loop and disposes the queue. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.loop_cancel.cancel();
            state.is_setup = false;
            state.queue.take()
        };
        if let Some(queue) = queue {
            queue.dispose().await;
        }
        debug!("service {} disposed", self.inner.address);
    }

    async fn declare(&self, broker: &dyn Broker) -> Result<Arc<dyn BrokerQueue>, BrokerError> {
        let address = &self.inner.address;
        broker
            .declare_exchange(address.namespace(), ExchangeKind::Topic, true, false)
            .await?;

        let (name, options) = match self.inner.kind {
            ServiceKind::Singleton => (
                address.to_string(),
                QueueOptions {
                    durable: false,
                    exclusive: true,
                    auto_delete: false,
                    args: HashMap::new(),
                },
            ),
            ServiceKind::Fanout => (
                format!("{address}%{}", random_suffix()),
                QueueOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    args: HashMap::new(),
                },
            ),
            ServiceKind::Balanced => (
                address.to_string(),
                QueueOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    args: HashMap::new(),
                },
            ),
        };
        broker
            .declare_queue(&name, options, address.namespace(), address.routing_key())
            .await
    }
}

/// 20 random bytes as 40 lowercase hex characters.
fn random_suffix() -> String {
    let mut suffix = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut suffix);
    hex::encode(suffix)
}

async fn run_loop(
    address: ServiceAddress,
    execution: Execution,
    behaviour: Arc<dyn ServiceBehaviour>,
    queue: Arc<dyn BrokerQueue>,
    cancel: CancellationToken,
    node: Weak<node::Inner>,
    tracker: TaskTracker,
) {
    loop {
        let message = match queue.receive_until_cancelled(&cancel).await {
            Ok(message) => message,
            Err(QueueError::Cancelled) => break,
            Err(error) => {
                let terminal = error == QueueError::Closed;
                if let Some(inner) = node.upgrade() {
                    Node::from_inner(inner).report_unhandled(UnhandledError {
                        address: address.clone(),
                        behaviour: format!("{behaviour:?}"),
                        error: Arc::new(error),
                    });
                }
                if terminal {
                    // The queue will never produce again; wait for resetup.
                    break;
                }
                continue;
            }
        };

        let Some(inner) = node.upgrade() else { break };
        let node_handle = Node::from_inner(inner);
        let envelope = Envelope::from_inbound(message, node_handle.clone());

        match execution {
            Execution::Serial => {
                if let Err(error) = behaviour.handle(envelope).await {
                    node_handle.report_unhandled(UnhandledError {
                        address: address.clone(),
                        behaviour: format!("{behaviour:?}"),
                        error: Arc::from(error),
                    });
                }
            }
            Execution::Parallel => {
                let behaviour = behaviour.clone();
                let address = address.clone();
                tracker.spawn(async move {
                    if let Err(error) = behaviour.handle(envelope).await {
                        node_handle.report_unhandled(UnhandledError {
                            address,
                            behaviour: format!("{behaviour:?}"),
                            error: Arc::from(error),
                        });
                    }
                });
            }
        }
    }
    debug!("service {address} receive loop exited");
}
