//! Topic exchanges and routing-key pattern matching.

use trellis_messaging::broker::ExchangeKind;

/// One binding from a routing-key pattern to a queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct QueueBinding {
    pub routing_key: String,
    pub queue: String,
}

/// Declared state of one exchange.
#[derive(Debug)]
pub(crate) struct ExchangeState {
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub bindings: Vec<QueueBinding>,
}

impl ExchangeState {
    pub(crate) const fn new(kind: ExchangeKind, durable: bool, auto_delete: bool) -> Self {
        Self {
            kind,
            durable,
            auto_delete,
            bindings: Vec::new(),
        }
    }

    /// Adds a binding, idempotently for identical pattern/queue pairs.
    pub(crate) fn bind(&mut self, routing_key: &str, queue: &str) {
        let binding = QueueBinding {
            routing_key: routing_key.to_string(),
            queue: queue.to_string(),
        };
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
    }

    /// Names of queues whose binding patterns match the routing key,
    /// deduplicated in binding order.
    pub(crate) fn route(&self, routing_key: &str) -> Vec<&str> {
        let mut queues: Vec<&str> = Vec::new();
        for binding in &self.bindings {
            if topic_matches(&binding.routing_key, routing_key)
                && !queues.contains(&binding.queue.as_str())
            {
                queues.push(&binding.queue);
            }
        }
        queues
    }
}

/// AMQP topic matching: `.`-separated words, `*` matches exactly one
/// word, `#` matches zero or more words.
pub(crate) fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_from(&pattern, &key)
}

fn matches_from(pattern: &[&str], key: &[&str]) -> bool {
    let Some((word, rest)) = pattern.split_first() else {
        return key.is_empty();
    };
    if *word == "#" {
        return (0..=key.len()).any(|skip| matches_from(rest, &key[skip..]));
    }
    match key.split_first() {
        Some((first, key_rest)) => (*word == "*" || word == first) && matches_from(rest, key_rest),
        None => false,
    }
}
