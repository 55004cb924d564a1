//! fleetgrid-runtime: the compute-unit runtime contract.
//!
//! A unit is an isolated process exposing TCP ports and a running/stopped
//! signal. Supervisors observe and command it exclusively through the
//! [`UnitRuntime`] trait; they never implement it.
//!
//! # Implementations
//!
//! - [`ProcessRuntime`]: launches the unit as a local OS process and talks
//!   HTTP/1 to its mapped port via hyper.
//! - `FakeRuntime` (feature `test-util`): scriptable in-memory runtime.

pub mod error;
pub mod forward;
pub mod process;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;

use bytes::Bytes;

use fleetgrid_state::{BoxFuture, StartupOptions};

pub use error::{FetchError, RuntimeError};
pub use forward::normalize_scheme;
pub use process::{ProcessConfig, ProcessRuntime};
#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeRuntime;

/// Port units serve traffic on unless told otherwise.
pub const DEFAULT_UNIT_PORT: u16 = 8080;

/// Fully buffered request addressed to a unit.
pub type UnitRequest = http::Request<Bytes>;

/// Raw response returned by a unit.
pub type UnitResponse = http::Response<Bytes>;

/// Commands and observations a supervisor may issue against its unit.
pub trait UnitRuntime: Send + Sync {
    /// Launch the unit with the given options.
    fn start<'a>(&'a self, opts: &'a StartupOptions) -> BoxFuture<'a, Result<(), RuntimeError>>;

    /// Whether the unit's process is currently executing.
    fn running(&self) -> bool;

    /// Resolves when the unit's process exits; rejects when the outcome
    /// cannot be observed.
    fn monitor(&self) -> BoxFuture<'static, Result<(), RuntimeError>>;

    /// Terminate the unit's process.
    fn destroy(&self) -> BoxFuture<'_, Result<(), RuntimeError>>;

    /// Send a request to one of the unit's ports.
    fn fetch(&self, port: u16, request: UnitRequest) -> BoxFuture<'_, Result<UnitResponse, FetchError>>;
}
