use thiserror::Error;

use crate::broker::BrokerError;

/// Errors raised by service lifecycle operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// `setup` was called twice without an intervening dispose.
    #[error("the service is already set up")]
    AlreadySetup,

    /// The service has been disposed.
    #[error("the service is disposed")]
    Disposed,

    /// A broker declaration failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
