//! fleet.toml configuration.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use fleetgrid_state::StartupOptions;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub retirement: RetirementConfig,
    #[serde(default)]
    pub pools: BTreeMap<String, PoolConfig>,
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/fleetgrid/fleet.redb"),
        }
    }
}

/// Durations are strings like `"5s"`, `"500ms"` or `"1m"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimersConfig {
    pub probe_interval: Option<String>,
    pub reconcile_interval: Option<String>,
    pub alarm_tick: Option<String>,
    pub monitor_retry_delay: Option<String>,
}

impl TimersConfig {
    pub fn probe_interval(&self) -> anyhow::Result<Duration> {
        duration_or("probe_interval", &self.probe_interval, Duration::from_secs(5))
    }

    pub fn reconcile_interval(&self) -> anyhow::Result<Duration> {
        duration_or("reconcile_interval", &self.reconcile_interval, Duration::from_secs(10))
    }

    pub fn alarm_tick(&self) -> anyhow::Result<Duration> {
        duration_or("alarm_tick", &self.alarm_tick, Duration::from_millis(500))
    }

    pub fn monitor_retry_delay(&self) -> anyhow::Result<Duration> {
        duration_or("monitor_retry_delay", &self.monitor_retry_delay, Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetirementConfig {
    /// Keep records of stopped and failed units instead of destroying them.
    #[serde(default)]
    pub keep_terminal: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Program launched for every unit of the pool.
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// First host port handed to the pool's units.
    pub base_port: u16,
    #[serde(default = "default_health")]
    pub health: bool,
    pub health_path: Option<String>,
    pub health_timeout: Option<String>,
}

fn default_health() -> bool {
    true
}

/// A unit to ensure exists at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitConfig {
    pub name: String,
    /// Empty or absent picks the only pool.
    #[serde(default)]
    pub pool: String,
    pub entrypoint: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub enable_internet: Option<bool>,
}

impl UnitConfig {
    pub fn startup_options(&self) -> StartupOptions {
        StartupOptions {
            env_vars: self.env.clone(),
            entrypoint: self.entrypoint.clone(),
            enable_internet: self.enable_internet,
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        Ok(config)
    }
}

fn duration_or(field: &str, value: &Option<String>, default: Duration) -> anyhow::Result<Duration> {
    match value {
        None => Ok(default),
        Some(s) => parse_duration(s).with_context(|| format!("invalid duration for {field}: {s:?}")),
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
