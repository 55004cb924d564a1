//! fleetgrid-registry: the fleet's directory of units and its router.
//!
//! The `FleetRegistry` is a single actor owning the persisted unit
//! directory. It creates units through named pools, routes requests to
//! them by name, and periodically reconciles the directory against each
//! unit's supervisor.
//!
//! # Architecture
//!
//! ```text
//! FleetRegistry
//!   ├── ActorStorage ("registry": directory + reconcile alarm)
//!   ├── RetirementPolicy (terminal unit → remove?)
//!   └── PoolMap: pool name → UnitFactory
//!         └── UnitPool (one UnitSupervisor per unit name)
//! ```

pub mod error;
pub mod policy;
pub mod pool;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use policy::{always_remove, keep_terminal, RetirementPolicy};
pub use pool::{PoolMap, ReleaseHook, RuntimeFactory, UnitFactory, UnitPool};
pub use registry::{FleetRegistry, ReconcileReport, RegistryConfig, REGISTRY_ACTOR_ID};
