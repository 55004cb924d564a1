//! Runtime error types.

use thiserror::Error;

/// Why a request could not be delivered to a unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The unit's process exists but nothing accepts connections on the port.
    #[error("the unit is not listening on the requested port")]
    NotListening,

    /// No process has been provisioned for the unit (yet).
    #[error("there is no unit instance that can be provided")]
    NoInstance,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors raised while commanding a unit's process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("failed to launch unit: {0}")]
    Launch(String),

    #[error("failed to observe unit exit: {0}")]
    Monitor(String),

    #[error("failed to destroy unit: {0}")]
    Destroy(String),
}
