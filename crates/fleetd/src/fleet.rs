//! Fleet assembly: store, pools, registry and the alarm loop.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use fleetgrid_health::HttpHealthCheck;
use fleetgrid_registry::{always_remove, keep_terminal, FleetRegistry, PoolMap, RegistryConfig, UnitPool};
use fleetgrid_runtime::{ProcessConfig, ProcessRuntime, RuntimeError, UnitRuntime};
use fleetgrid_state::{AlarmDriver, StateStore};
use fleetgrid_supervisor::SupervisorConfig;

use crate::config::{parse_duration, FleetConfig, PoolConfig, UnitConfig};

/// Hands out one stable host port per unit name: the lowest free port at or
/// above a base. Released ports are handed out again.
pub struct PortMap {
    base: u16,
    assigned: Mutex<HashMap<String, u16>>,
}

impl PortMap {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            assigned: Mutex::new(HashMap::new()),
        }
    }

    pub fn port_for(&self, unit: &str) -> Result<u16, RuntimeError> {
        let mut assigned = self.assigned.lock().expect("port map lock");
        if let Some(port) = assigned.get(unit) {
            return Ok(*port);
        }

        let taken: HashSet<u16> = assigned.values().copied().collect();
        let port = (self.base..=u16::MAX)
            .find(|port| !taken.contains(port))
            .ok_or_else(|| RuntimeError::Launch(format!("no free host port at or above {}", self.base)))?;
        assigned.insert(unit.to_string(), port);
        Ok(port)
    }

    pub fn release(&self, unit: &str) {
        self.assigned.lock().expect("port map lock").remove(unit);
    }
}

/// Everything a running daemon holds on to.
pub struct Fleet {
    pub store: StateStore,
    pub alarms: AlarmDriver,
    pub registry: Arc<FleetRegistry>,
    pub alarm_tick: Duration,
}

impl Fleet {
    /// Open the store and build pools and registry from `config`.
    pub fn assemble(config: &FleetConfig) -> anyhow::Result<Self> {
        if let Some(dir) = config.store.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let store = StateStore::open(&config.store.path)?;
        info!(path = ?config.store.path, "state store opened");
        let alarms = AlarmDriver::new(store.clone());

        let supervisor_config = SupervisorConfig {
            probe_interval: config.timers.probe_interval()?,
            monitor_retry_delay: config.timers.monitor_retry_delay()?,
        };

        let mut pools = PoolMap::new();
        for (name, pool) in &config.pools {
            let unit_pool = build_pool(name, pool, &store, &alarms, supervisor_config.clone())?;
            pools.insert(name.clone(), Arc::new(unit_pool));
            info!(pool = %name, command = ?pool.command, base_port = pool.base_port, "pool configured");
        }

        let policy = if config.retirement.keep_terminal {
            keep_terminal()
        } else {
            always_remove()
        };
        let registry = FleetRegistry::new(pools, &store, alarms.clone())
            .with_policy(policy)
            .with_config(RegistryConfig {
                reconcile_interval: config.timers.reconcile_interval()?,
            })
            .activate()?;

        Ok(Self {
            store,
            alarms,
            registry,
            alarm_tick: config.timers.alarm_tick()?,
        })
    }

    /// Resume recorded units, then make sure every declared unit exists.
    ///
    /// A declared unit that fails to start is logged and skipped.
    pub async fn bring_up(&self, units: &[UnitConfig]) -> anyhow::Result<()> {
        let resumed = self.registry.recover().await?;
        info!(resumed, "recorded units resumed");

        for unit in units {
            if let Err(e) = self
                .registry
                .new_unit(unit.startup_options(), &unit.name, &unit.pool)
                .await
            {
                error!(unit = %unit.name, pool = %unit.pool, error = %e, "failed to start declared unit");
            }
        }
        Ok(())
    }

    /// Drive alarms until `shutdown` flips.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        self.alarms.run(self.alarm_tick, shutdown).await;
    }
}

fn build_pool(
    name: &str,
    pool: &PoolConfig,
    store: &StateStore,
    alarms: &AlarmDriver,
    supervisor_config: SupervisorConfig,
) -> anyhow::Result<UnitPool> {
    let ports = Arc::new(PortMap::new(pool.base_port));
    let template = ProcessConfig {
        args: pool.args.clone(),
        ..ProcessConfig::new(pool.command.clone(), pool.base_port)
    };

    let allocator = ports.clone();
    let make_runtime = move |unit: &str| -> Result<Arc<dyn UnitRuntime>, RuntimeError> {
        let config = ProcessConfig {
            host_port: allocator.port_for(unit)?,
            ..template.clone()
        };
        Ok(Arc::new(ProcessRuntime::new(unit, config)) as Arc<dyn UnitRuntime>)
    };

    let mut unit_pool = UnitPool::new(name, store, alarms.clone(), Arc::new(make_runtime))
        .with_config(supervisor_config)
        .with_release_hook(Arc::new(move |unit: &str| ports.release(unit)));

    if pool.health {
        let mut check = HttpHealthCheck::default();
        if let Some(path) = &pool.health_path {
            check.path = path.clone();
        }
        if let Some(timeout) = &pool.health_timeout {
            check.timeout = parse_duration(timeout)
                .with_context(|| format!("invalid health_timeout for pool {name}: {timeout:?}"))?;
        }
        unit_pool = unit_pool.with_health_check(Arc::new(check));
    }
    Ok(unit_pool)
}
