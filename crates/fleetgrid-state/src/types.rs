//! Domain types persisted by FleetGrid actors.
//!
//! All types are serializable to/from JSON for storage in redb tables.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage key under which a supervisor keeps its `ContainerState`.
pub const STATE_KEY: &str = "state";

/// Storage key under which the registry keeps its unit directory.
pub const DIRECTORY_KEY: &str = "units";

// ── Container state ───────────────────────────────────────────────

/// Lifecycle state of a single managed unit.
///
/// `Unknown` is only ever read back when storage holds no prior record;
/// a supervisor never transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Starting,
    Running,
    Unhealthy,
    Stopped,
    Failed,
    #[default]
    Unknown,
}

impl ContainerState {
    /// `Stopped` and `Failed` expect no further transitions without an
    /// explicit start.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Startup options ───────────────────────────────────────────────

/// Options handed from the fleet's create call to the unit's start call.
///
/// Opaque to the registry and supervisor; only the runtime interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupOptions {
    /// Environment variables injected into the unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<HashMap<String, String>>,
    /// Arguments the unit's entrypoint is launched with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Whether the unit may reach the public internet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_internet: Option<bool>,
}

impl StartupOptions {
    pub fn with_entrypoint<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entrypoint: Some(args.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

// ── Unit record ───────────────────────────────────────────────────

/// One entry in the registry's unit directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Unique unit name.
    pub name: String,
    /// Pool the unit was created in.
    pub pool: String,
    pub startup_options: StartupOptions,
    /// State observed during the last reconciliation pass.
    pub last_known_state: ContainerState,
}

impl UnitRecord {
    /// A freshly accepted unit, not yet observed by reconciliation.
    pub fn new(name: &str, pool: &str, startup_options: StartupOptions) -> Self {
        Self {
            name: name.to_string(),
            pool: pool.to_string(),
            startup_options,
            last_known_state: ContainerState::Starting,
        }
    }
}

/// Storage namespace of a unit supervisor.
pub fn unit_actor_id(pool: &str, name: &str) -> String {
    format!("unit/{pool}/{name}")
}
