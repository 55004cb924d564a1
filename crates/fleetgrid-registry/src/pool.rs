//! Unit pools: named factories handing out one supervisor per unit.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use fleetgrid_health::HealthCheck;
use fleetgrid_runtime::{RuntimeError, UnitRuntime};
use fleetgrid_state::{AlarmDriver, StateStore};
use fleetgrid_supervisor::{NoHooks, StateHooks, SupervisorConfig, SupervisorResult, UnitSupervisor};

/// Addresses the supervisor of a unit by name within one pool.
pub trait UnitFactory: Send + Sync {
    /// The live supervisor for `name`, created on first use.
    fn unit(&self, name: &str) -> SupervisorResult<Arc<UnitSupervisor>>;

    /// Forget a retired unit. A live supervisor under `name` is kept.
    fn evict(&self, name: &str);
}

/// Pool name → factory. Built once, read-only afterwards.
pub type PoolMap = BTreeMap<String, Arc<dyn UnitFactory>>;

/// Builds the runtime handle for a unit name.
pub type RuntimeFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn UnitRuntime>, RuntimeError> + Send + Sync>;

/// Called with the name of every unit a pool evicts.
pub type ReleaseHook = Arc<dyn Fn(&str) + Send + Sync>;

/// A class of units sharing a runtime profile and health check.
pub struct UnitPool {
    name: String,
    store: StateStore,
    alarms: AlarmDriver,
    make_runtime: RuntimeFactory,
    health_check: Option<Arc<dyn HealthCheck>>,
    hooks: Arc<dyn StateHooks>,
    config: SupervisorConfig,
    release: Option<ReleaseHook>,
    /// Live supervisors: unit name → supervisor.
    units: Mutex<HashMap<String, Arc<UnitSupervisor>>>,
}

impl UnitPool {
    pub fn new(name: &str, store: &StateStore, alarms: AlarmDriver, make_runtime: RuntimeFactory) -> Self {
        Self {
            name: name.to_string(),
            store: store.clone(),
            alarms,
            make_runtime,
            health_check: None,
            hooks: Arc::new(NoHooks),
            config: SupervisorConfig::default(),
            release: None,
            units: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = Some(check);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn StateHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `hook` whenever a unit is evicted, e.g. to free its host port.
    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.release = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of supervisors currently held.
    pub fn unit_count(&self) -> usize {
        self.units.lock().expect("unit pool lock").len()
    }

    fn build(&self, unit: &str) -> SupervisorResult<Arc<UnitSupervisor>> {
        let mut supervisor = UnitSupervisor::new(
            &self.name,
            unit,
            (self.make_runtime)(unit)?,
            &self.store,
            self.alarms.clone(),
        )
        .with_hooks(self.hooks.clone())
        .with_config(self.config.clone());
        if let Some(check) = &self.health_check {
            supervisor = supervisor.with_health_check(check.clone());
        }
        Ok(supervisor.activate())
    }
}

impl UnitFactory for UnitPool {
    fn unit(&self, name: &str) -> SupervisorResult<Arc<UnitSupervisor>> {
        let mut units = self.units.lock().expect("unit pool lock");
        match units.get(name) {
            Some(existing) if !existing.is_destroyed() => Ok(existing.clone()),
            _ => {
                let supervisor = self.build(name)?;
                units.insert(name.to_string(), supervisor.clone());
                debug!(pool = %self.name, unit = %name, "supervisor created");
                Ok(supervisor)
            }
        }
    }

    fn evict(&self, name: &str) {
        let mut units = self.units.lock().expect("unit pool lock");
        if !units.get(name).is_some_and(|unit| unit.is_destroyed()) {
            return;
        }
        units.remove(name);
        drop(units);

        if let Some(release) = &self.release {
            release(name);
        }
        debug!(pool = %self.name, unit = %name, "supervisor evicted");
    }
}
