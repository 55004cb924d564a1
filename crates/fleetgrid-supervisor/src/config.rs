//! Supervisor configuration.

use std::time::Duration;

/// Timing knobs for a unit supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay between health probes.
    pub probe_interval: Duration,
    /// Pause before re-attaching a monitor to a unit that exited while
    /// still starting.
    pub monitor_retry_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            monitor_retry_delay: Duration::from_secs(1),
        }
    }
}
