//! Integration tests for typed event subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serial_test::serial;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use trellis_messaging::broker::{Broker, OutboundMessage, QueueError};
use trellis_messaging::headers::EVENT_HEADER;
use trellis_messaging::serializer;
use trellis_messaging::subscription::{self, EventObserver};
use trellis_messaging::{EventAddress, Node};
use trellis_messaging_memory::MemoryBroker;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct UserCreated {
    id: u64,
    name: String,
}

fn sample(n: u64) -> UserCreated {
    UserCreated {
        id: n,
        name: format!("user-{n}"),
    }
}

async fn setup() -> (MemoryBroker, Node) {
    serializer::register_default_serializers();
    let broker = MemoryBroker::new();
    let node = Node::new(Arc::new(broker.clone()));
    (broker, node)
}

/// Publishes a raw event delivery, bypassing the node's encoder.
async fn publish_raw(broker: &MemoryBroker, routing_key: &str, header_line: &str, body: &[u8]) {
    let mut headers = HashMap::new();
    headers.insert(
        EVENT_HEADER.to_string(),
        Bytes::from(header_line.to_string()),
    );
    broker
        .publish(
            "domain",
            routing_key,
            OutboundMessage {
                correlation_id: None,
                reply_to: None,
                headers,
                body: Bytes::from(body.to_vec()),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn receives_typed_events() {
    let (_broker, node) = setup().await;
    let address = EventAddress::new("domain", "user.created");
    let subscription = node.subscribe::<UserCreated>(address.clone()).await.unwrap();

    node.publish(&address, "json", &sample(1)).await.unwrap();
    node.publish(&address, "cbor", &sample(2)).await.unwrap();

    assert_eq!(
        subscription
            .receive_timeout(Duration::from_secs(1))
            .await
            .unwrap(),
        sample(1)
    );
    // The serializer is chosen per message from its header.
    assert_eq!(
        subscription
            .receive_timeout(Duration::from_secs(1))
            .await
            .unwrap(),
        sample(2)
    );
}

#[tokio::test]
#[serial]
async fn receive_skips_undecodable_messages() {
    let (broker, node) = setup().await;
    let address = EventAddress::new("domain", "user.created");
    let subscription = node.subscribe::<UserCreated>(address.clone()).await.unwrap();

    // Malformed body, missing header, foreign version, then one good event.
    publish_raw(&broker, "user.created", "1.1 json", b"{not json").await;
    broker
        .publish(
            "domain",
            "user.created",
            OutboundMessage {
                correlation_id: None,
                reply_to: None,
                headers: HashMap::new(),
                body: Bytes::from_static(b"{}"),
            },
        )
        .await
        .unwrap();
    publish_raw(&broker, "user.created", "2.0 json", b"{}").await;
    node.publish(&address, "json", &sample(7)).await.unwrap();

    assert_eq!(
        subscription
            .receive_timeout(Duration::from_secs(1))
            .await
            .unwrap(),
        sample(7)
    );
}

#[tokio::test]
#[serial]
async fn receive_timeout_elapses_without_traffic() {
    let (_broker, node) = setup().await;
    let subscription = node
        .subscribe::<UserCreated>(EventAddress::new("domain", "user.created"))
        .await
        .unwrap();

    assert_eq!(
        subscription
            .receive_timeout(Duration::from_millis(50))
            .await
            .err(),
        Some(subscription::Error::Queue(QueueError::Timeout))
    );
}

#[tokio::test]
#[serial]
async fn receive_observes_caller_cancellation() {
    let (_broker, node) = setup().await;
    let subscription = node
        .subscribe::<UserCreated>(EventAddress::new("domain", "user.created"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trip = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    assert_eq!(
        subscription.receive_until_cancelled(&cancel).await.err(),
        Some(subscription::Error::Queue(QueueError::Cancelled))
    );
    trip.await.unwrap();
}

#[tokio::test]
#[serial]
async fn wildcard_filters_span_routing_keys() {
    let (_broker, node) = setup().await;
    let subscription = node
        .subscribe::<UserCreated>(EventAddress::new("domain", "user.*"))
        .await
        .unwrap();

    node.publish(&EventAddress::new("domain", "user.created"), "json", &sample(1))
        .await
        .unwrap();
    node.publish(&EventAddress::new("domain", "user.deleted"), "json", &sample(2))
        .await
        .unwrap();
    node.publish(&EventAddress::new("domain", "group.created"), "json", &sample(3))
        .await
        .unwrap();

    assert_eq!(
        subscription
            .receive_timeout(Duration::from_secs(1))
            .await
            .unwrap(),
        sample(1)
    );
    assert_eq!(
        subscription
            .receive_timeout(Duration::from_secs(1))
            .await
            .unwrap(),
        sample(2)
    );
    assert_eq!(
        subscription
            .receive_timeout(Duration::from_millis(100))
            .await
            .err(),
        Some(subscription::Error::Queue(QueueError::Timeout))
    );
}

#[derive(Debug)]
enum Delivery {
    Next(UserCreated),
    Error(String),
    Completed,
}

#[derive(Debug)]
struct Recording {
    sender: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl EventObserver<UserCreated> for Recording {
    async fn on_next(&self, event: UserCreated) {
        self.sender.send(Delivery::Next(event)).ok();
    }

    async fn on_error(&self, error: &subscription::Error) {
        self.sender.send(Delivery::Error(error.to_string())).ok();
    }

    async fn on_completed(&self) {
        self.sender.send(Delivery::Completed).ok();
    }
}

#[tokio::test]
#[serial]
async fn observer_sees_errors_instead_of_silent_drops() {
    let (broker, node) = setup().await;
    let address = EventAddress::new("domain", "user.created");
    let subscription = node.subscribe::<UserCreated>(address.clone()).await.unwrap();

    let (sender, mut deliveries) = mpsc::unbounded_channel();
    subscription.observe(Arc::new(Recording { sender }));

    publish_raw(&broker, "user.created", "1.1 json", b"{not json").await;
    node.publish(&address, "json", &sample(4)).await.unwrap();

    let first = timeout(Duration::from_secs(1), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, Delivery::Error(_)), "got {first:?}");

    let second = timeout(Duration::from_secs(1), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    match second {
        Delivery::Next(event) => assert_eq!(event, sample(4)),
        other => panic!("expected an event, got {other:?}"),
    }

    // Disposing the subscription completes the observer.
    subscription.dispose().await;
    let last = timeout(Duration::from_secs(1), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(last, Delivery::Completed), "got {last:?}");
}

#[tokio::test]
#[serial]
async fn dispose_is_idempotent() {
    let (_broker, node) = setup().await;
    let subscription = node
        .subscribe::<UserCreated>(EventAddress::new("domain", "user.created"))
        .await
        .unwrap();

    subscription.dispose().await;
    subscription.dispose().await;

    assert_eq!(
        subscription.receive().await.err(),
        Some(subscription::Error::Queue(QueueError::Closed))
    );
}
