//! Envelopes carry one decoded inbound message through dispatch.

use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

use crate::broker::InboundMessage;
use crate::node::Node;

/// An immutable carrier for one inbound message, with a back-reference to
/// the node it arrived on so behaviours can reply.
#[derive(Clone, Debug)]
pub struct Envelope {
    id: Uuid,
    reply_to: String,
    headers: HashMap<String, Bytes>,
    body: Bytes,
    node: Node,
}

impl Envelope {
    /// Wraps a broker delivery, attaching the owning node.
    #[must_use]
    pub fn from_inbound(message: InboundMessage, node: Node) -> Self {
        Self {
            id: message.correlation_id.unwrap_or_else(Uuid::nil),
            reply_to: message.reply_to.unwrap_or_default(),
            headers: message.headers,
            body: message.body,
            node,
        }
    }

    /// Correlation id; [`Uuid::nil`] when the sender supplied none.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Queue name replies should be routed to; may be empty.
    #[must_use]
    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Looks up one application header by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Bytes> {
        self.headers.get(name)
    }

    /// All application headers.
    #[must_use]
    pub const fn headers(&self) -> &HashMap<String, Bytes> {
        &self.headers
    }

    /// Opaque payload.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// The node this message arrived on.
    #[must_use]
    pub const fn node(&self) -> &Node {
        &self.node
    }
}
