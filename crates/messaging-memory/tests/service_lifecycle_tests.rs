//! Integration tests for service declaration, execution strategies,
//! failover, and disposal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serial_test::serial;
use tokio::sync::{mpsc, Barrier, Mutex};
use tokio::time::timeout;

use trellis_messaging::behaviour::{HandlerError, ServiceBehaviour};
use trellis_messaging::broker::{Broker, OutboundMessage};
use trellis_messaging::{Envelope, Execution, Node, ServiceAddress, ServiceKind};
use trellis_messaging_memory::MemoryBroker;

/// Forwards each message body to a channel.
#[derive(Clone, Debug)]
struct Forwarding {
    sender: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl ServiceBehaviour for Forwarding {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.sender
            .send(String::from_utf8_lossy(envelope.body()).to_string())
            .ok();
        Ok(())
    }
}

fn forwarding() -> (Arc<Forwarding>, mpsc::UnboundedReceiver<String>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(Forwarding { sender }), receiver)
}

async fn publish(broker: &MemoryBroker, namespace: &str, routing_key: &str, body: &str) {
    broker
        .publish(
            namespace,
            routing_key,
            OutboundMessage {
                correlation_id: None,
                reply_to: None,
                headers: HashMap::new(),
                body: Bytes::from(body.to_string()),
            },
        )
        .await
        .unwrap();
}

async fn drain(receiver: &mut mpsc::UnboundedReceiver<String>, count: usize) -> Vec<String> {
    let mut bodies = Vec::with_capacity(count);
    for _ in 0..count {
        bodies.push(
            timeout(Duration::from_secs(1), receiver.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    bodies
}

#[tokio::test]
#[serial]
async fn setup_twice_without_dispose_fails() {
    let broker = MemoryBroker::new();
    let node = Node::new(Arc::new(broker));
    let (behaviour, _receiver) = forwarding();
    let service = node
        .host_service(
            ServiceAddress::new("orders", "intake"),
            ServiceKind::Balanced,
            Execution::Serial,
            behaviour,
        )
        .await
        .unwrap();

    assert_eq!(
        service.setup().await.err(),
        Some(trellis_messaging::service::Error::AlreadySetup)
    );
}

#[tokio::test]
#[serial]
async fn fanout_services_each_get_a_copy() {
    let broker = MemoryBroker::new();
    let node = Node::new(Arc::new(broker.clone()));
    let address = ServiceAddress::new("orders", "created");

    let (first, mut first_rx) = forwarding();
    let (second, mut second_rx) = forwarding();
    node.host_service(address.clone(), ServiceKind::Fanout, Execution::Serial, first)
        .await
        .unwrap();
    node.host_service(address, ServiceKind::Fanout, Execution::Serial, second)
        .await
        .unwrap();

    for n in 0..3 {
        publish(&broker, "orders", "created", &format!("m{n}")).await;
    }

    assert_eq!(drain(&mut first_rx, 3).await, vec!["m0", "m1", "m2"]);
    assert_eq!(drain(&mut second_rx, 3).await, vec!["m0", "m1", "m2"]);
}

#[tokio::test]
#[serial]
async fn balanced_services_share_the_work() {
    let broker = MemoryBroker::new();
    let node = Node::new(Arc::new(broker.clone()));
    let address = ServiceAddress::new("orders", "process");

    /// Records bodies and lingers so deliveries interleave across
    /// consumers.
    #[derive(Clone, Debug)]
    struct Slow {
        sender: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl ServiceBehaviour for Slow {
        async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
            self.sender
                .send(String::from_utf8_lossy(envelope.body()).to_string())
                .ok();
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        }
    }

    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();
    node.host_service(
        address.clone(),
        ServiceKind::Balanced,
        Execution::Serial,
        Arc::new(Slow { sender: first_tx }),
    )
    .await
    .unwrap();
    node.host_service(
        address,
        ServiceKind::Balanced,
        Execution::Serial,
        Arc::new(Slow { sender: second_tx }),
    )
    .await
    .unwrap();

    for n in 0..10 {
        publish(&broker, "orders", "process", &format!("m{n}")).await;
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut seen = Vec::new();
    let mut first_count = 0;
    while let Ok(body) = first_rx.try_recv() {
        seen.push(body);
        first_count += 1;
    }
    let mut second_count = 0;
    while let Ok(body) = second_rx.try_recv() {
        seen.push(body);
        second_count += 1;
    }

    // Every message is processed exactly once, spread across consumers.
    seen.sort();
    let expected: Vec<String> = (0..10).map(|n| format!("m{n}")).collect();
    let mut expected_sorted = expected;
    expected_sorted.sort();
    assert_eq!(seen, expected_sorted);
    assert!(first_count >= 2, "first consumer got {first_count} messages");
    assert!(second_count >= 2, "second consumer got {second_count} messages");
}

#[tokio::test]
#[serial]
async fn serial_execution_finishes_each_handler_first() {
    let broker = MemoryBroker::new();
    let node = Node::new(Arc::new(broker.clone()));

    /// Records handler start and end markers.
    #[derive(Clone, Debug)]
    struct Tracing {
        log: Arc<Mutex<Vec<String>>>,
        done: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl ServiceBehaviour for Tracing {
        async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
            let body = String::from_utf8_lossy(envelope.body()).to_string();
            self.log.lock().await.push(format!("start:{body}"));
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.log.lock().await.push(format!("end:{body}"));
            self.done.send(()).ok();
            Ok(())
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    node.host_service(
        ServiceAddress::new("orders", "audit"),
        ServiceKind::Balanced,
        Execution::Serial,
        Arc::new(Tracing {
            log: log.clone(),
            done: done_tx,
        }),
    )
    .await
    .unwrap();

    for n in 0..5 {
        publish(&broker, "orders", "audit", &format!("{n}")).await;
    }
    for _ in 0..5 {
        timeout(Duration::from_secs(1), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }

    let log = log.lock().await;
    let expected: Vec<String> = (0..5)
        .flat_map(|n| [format!("start:{n}"), format!("end:{n}")])
        .collect();
    assert_eq!(*log, expected);
}

#[tokio::test]
#[serial]
async fn parallel_execution_dispatches_before_handlers_return() {
    let broker = MemoryBroker::new();
    let node = Node::new(Arc::new(broker.clone()));
    const MESSAGES: usize = 20;

    /// Records start order, then holds every handler at a barrier until
    /// all of them have started.
    #[derive(Clone, Debug)]
    struct Gated {
        starts: Arc<Mutex<Vec<String>>>,
        barrier: Arc<Barrier>,
        done: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl ServiceBehaviour for Gated {
        async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
            self.starts
                .lock()
                .await
                .push(String::from_utf8_lossy(envelope.body()).to_string());
            self.barrier.wait().await;
            self.done.send(()).ok();
            Ok(())
        }
    }

    let starts = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    node.host_service(
        ServiceAddress::new("orders", "burst"),
        ServiceKind::Balanced,
        Execution::Parallel,
        Arc::new(Gated {
            starts: starts.clone(),
            barrier: Arc::new(Barrier::new(MESSAGES)),
            done: done_tx,
        }),
    )
    .await
    .unwrap();

    for n in 0..MESSAGES {
        publish(&broker, "orders", "burst", &format!("{n:02}")).await;
    }

    // The barrier only opens once every handler has started; if the loop
    // awaited handlers, this would never complete.
    for _ in 0..MESSAGES {
        timeout(Duration::from_secs(2), done_rx.recv())
            .await
            .expect("handlers deadlocked: dispatch waited on an earlier handler")
            .unwrap();
    }

    let starts = starts.lock().await;
    let expected: Vec<String> = (0..MESSAGES).map(|n| format!("{n:02}")).collect();
    assert_eq!(*starts, expected, "start order must equal delivery order");
}

#[tokio::test]
#[serial]
async fn dispose_is_idempotent_and_stops_delivery() {
    let broker = MemoryBroker::new();
    let node = Node::new(Arc::new(broker.clone()));
    let (behaviour, mut receiver) = forwarding();
    let service = node
        .host_service(
            ServiceAddress::new("orders", "intake"),
            ServiceKind::Balanced,
            Execution::Serial,
            behaviour,
        )
        .await
        .unwrap();

    publish(&broker, "orders", "intake", "before").await;
    assert_eq!(drain(&mut receiver, 1).await, vec!["before"]);

    service.dispose().await;
    service.dispose().await;

    publish(&broker, "orders", "intake", "after").await;
    assert!(
        timeout(Duration::from_millis(100), receiver.recv())
            .await
            .is_err(),
        "no delivery after dispose"
    );

    assert_eq!(
        service.setup().await.err(),
        Some(trellis_messaging::service::Error::Disposed)
    );
}

#[tokio::test]
#[serial]
async fn resetup_moves_the_service_to_a_new_broker() {
    let old_broker = MemoryBroker::new();
    let node = Node::new(Arc::new(old_broker.clone()));
    let (behaviour, mut receiver) = forwarding();
    node.host_service(
        ServiceAddress::new("orders", "intake"),
        ServiceKind::Balanced,
        Execution::Serial,
        behaviour,
    )
    .await
    .unwrap();

    publish(&old_broker, "orders", "intake", "on-old").await;
    assert_eq!(drain(&mut receiver, 1).await, vec!["on-old"]);

    let new_broker = MemoryBroker::new();
    node.failover(Arc::new(new_broker.clone())).await.unwrap();

    publish(&new_broker, "orders", "intake", "on-new").await;
    assert_eq!(drain(&mut receiver, 1).await, vec!["on-new"]);
}

#[tokio::test]
#[serial]
async fn singleton_survives_failover_to_a_fresh_broker() {
    let old_broker = MemoryBroker::new();
    let node = Node::new(Arc::new(old_broker));
    let (behaviour, mut receiver) = forwarding();
    node.host_service(
        ServiceAddress::new("orders", "lead"),
        ServiceKind::Singleton,
        Execution::Serial,
        behaviour,
    )
    .await
    .unwrap();

    // The exclusive queue is re-declared cleanly on the new broker.
    let new_broker = MemoryBroker::new();
    node.failover(Arc::new(new_broker.clone())).await.unwrap();

    publish(&new_broker, "orders", "lead", "after-failover").await;
    assert_eq!(drain(&mut receiver, 1).await, vec!["after-failover"]);
}
