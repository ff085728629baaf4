//! `namespace:routing-key` addresses for services and event topics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when parsing an address.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The address has no `:` separator.
    #[error("address `{0}` is missing the `:` separator")]
    MissingSeparator(String),

    /// The namespace part is empty.
    #[error("address `{0}` has an empty namespace")]
    EmptyNamespace(String),

    /// The routing-key part is empty.
    #[error("address `{0}` has an empty routing key")]
    EmptyRoutingKey(String),
}

fn split_address(s: &str) -> Result<(String, String), Error> {
    let (namespace, routing_key) = s
        .split_once(':')
        .ok_or_else(|| Error::MissingSeparator(s.to_string()))?;
    if namespace.is_empty() {
        return Err(Error::EmptyNamespace(s.to_string()));
    }
    if routing_key.is_empty() {
        return Err(Error::EmptyRoutingKey(s.to_string()));
    }
    Ok((namespace.to_string(), routing_key.to_string()))
}

macro_rules! define_address {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name {
            namespace: String,
            routing_key: String,
        }

        impl $name {
            /// Creates an address from its two parts.
            pub fn new<N, K>(namespace: N, routing_key: K) -> Self
            where
                N: Into<String>,
                K: Into<String>,
            {
                Self {
                    namespace: namespace.into(),
                    routing_key: routing_key.into(),
                }
            }

            /// The exchange namespace.
            #[must_use]
            pub fn namespace(&self) -> &str {
                &self.namespace
            }

            /// The routing key within the namespace.
            #[must_use]
            pub fn routing_key(&self) -> &str {
                &self.routing_key
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", self.namespace, self.routing_key)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                let (namespace, routing_key) = split_address(s)?;
                Ok(Self {
                    namespace,
                    routing_key,
                })
            }
        }
    };
}

define_address!(
    ServiceAddress,
    "Names one service; the string form doubles as the queue name for \
     singleton and balanced services."
);

define_address!(
    EventAddress,
    "Names a topic filter on an event exchange; the routing key may carry \
     broker wildcards."
);
