//! Supervisor error types.

use thiserror::Error;

use fleetgrid_runtime::{FetchError, RuntimeError};

/// Errors surfaced by supervisor operations.
///
/// Health check failures never show up here; they are absorbed into state
/// transitions.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unit supervisor has been destroyed")]
    Destroyed,

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("forward failed: {0}")]
    Forward(#[from] FetchError),

    #[error("state store error: {0}")]
    State(#[from] fleetgrid_state::StateError),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
