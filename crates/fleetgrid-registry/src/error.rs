//! Registry error types.

use thiserror::Error;

/// Errors surfaced to callers of the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no pools configured")]
    NoPools,

    #[error("pool name required, configured pools: {0}")]
    AmbiguousPool(String),

    #[error("no such pool: {0}")]
    NoSuchPool(String),

    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("unit {name} has {count} directory records")]
    DuplicateUnit { name: String, count: usize },

    #[error("supervisor error: {0}")]
    Supervisor(#[from] fleetgrid_supervisor::SupervisorError),

    #[error("state store error: {0}")]
    State(#[from] fleetgrid_state::StateError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
