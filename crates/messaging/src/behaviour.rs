//! Behaviours consume decoded envelopes on behalf of a service.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::envelope::Envelope;

/// Error escaping a behaviour; the service loop reports it through the
/// node's unhandled-error channel and keeps running.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A message handler bound to a service's queue.
#[async_trait]
pub trait ServiceBehaviour: Debug + Send + Sync + 'static {
    /// Handles one envelope. Errors that can be attributed to a specific
    /// request should be answered on the wire instead of returned here.
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError>;
}
