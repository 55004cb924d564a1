//! fleetgrid-supervisor: lifecycle supervision for a single unit.
//!
//! A `UnitSupervisor` is a single-writer actor owning one unit's
//! `ContainerState`. It starts the unit, probes it on every alarm, and
//! watches for the unit's process to exit.
//!
//! # State machine
//!
//! ```text
//! starting ──► running ──► {unhealthy, stopped, failed}
//!                 ▲            │
//!                 └────────────┘  unhealthy → running | stopped
//! ```
//!
//! `stopped` and `failed` are terminal until the next `start`. `unknown` is
//! only what an empty store reads back as.
//!
//! Every read-then-write of the state happens inside the supervisor's
//! exclusive section, so transitions are totally ordered per unit.

pub mod config;
pub mod error;
pub mod hooks;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use error::{SupervisorError, SupervisorResult};
pub use hooks::{NoHooks, StateHooks};
pub use supervisor::UnitSupervisor;
