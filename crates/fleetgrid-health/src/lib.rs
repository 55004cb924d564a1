//! fleetgrid-health: health checking for FleetGrid units.
//!
//! Provides the optional health-check capability a supervisor probes its
//! unit with, the default HTTP check, and the table mapping each probe
//! outcome onto the unit's next `ContainerState`.
//!
//! # Architecture
//!
//! ```text
//! HealthCheck::check(&dyn UnitRuntime)
//!   └── HealthReport / HealthError
//!         └── ProbeResult::classify()
//!               └── next_state(current, probe) → Option<ContainerState>
//! ```
//!
//! A check may answer with a sentinel status string (`"ok"`,
//! `"not_listening"`, `"no_container_yet"`) or hand back the unit's own
//! response when the unit answered but is unhealthy.

pub mod check;
pub mod checker;

pub use check::{HealthCheck, HealthError, HealthReport, HttpHealthCheck};
pub use checker::{next_state, ProbeResult, NOT_LISTENING, NO_CONTAINER_YET, OK};
