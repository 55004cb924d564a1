//! FleetRegistry: the directory of units, routing and reconciliation.
//!
//! The directory is a single `Vec<UnitRecord>` stored under one key, so
//! every mutation (a new unit, a removal, a whole reconciliation pass) is
//! one atomic replace.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use fleetgrid_runtime::{UnitRequest, UnitResponse, DEFAULT_UNIT_PORT};
use fleetgrid_state::{
    epoch_millis, ActorStorage, AlarmDriver, AlarmHandler, BoxFuture, StartupOptions, StateStore, UnitRecord,
    DIRECTORY_KEY,
};

use crate::error::{RegistryError, RegistryResult};
use crate::policy::{always_remove, RetirementPolicy};
use crate::pool::{PoolMap, UnitFactory};

/// Actor id of the registry in the state store.
pub const REGISTRY_ACTOR_ID: &str = "registry";

/// Registry timing.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Delay between reconciliation passes.
    pub reconcile_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(10),
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records kept, with their state refreshed.
    pub kept: usize,
    /// Names of units destroyed and dropped from the directory.
    pub removed: Vec<String>,
}

pub struct FleetRegistry {
    pools: PoolMap,
    storage: ActorStorage,
    alarms: AlarmDriver,
    policy: RetirementPolicy,
    config: RegistryConfig,
    /// Exclusive section around every directory read-then-write.
    section: tokio::sync::Mutex<()>,
}

impl FleetRegistry {
    pub fn new(pools: PoolMap, store: &StateStore, alarms: AlarmDriver) -> Self {
        Self {
            pools,
            storage: store.actor(REGISTRY_ACTOR_ID),
            alarms,
            policy: always_remove(),
            config: RegistryConfig::default(),
            section: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: RetirementPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Register with the alarm driver and schedule the first reconciliation.
    pub fn activate(self) -> RegistryResult<Arc<Self>> {
        let registry = Arc::new(self);
        registry.alarms.register(REGISTRY_ACTOR_ID, registry.clone());
        registry.arm_alarm()?;
        Ok(registry)
    }

    /// Resolve a pool by name. An empty name picks the only configured pool.
    pub fn resolve_pool(&self, pool: &str) -> RegistryResult<(&str, Arc<dyn UnitFactory>)> {
        if !pool.is_empty() {
            return self
                .pools
                .get_key_value(pool)
                .map(|(name, factory)| (name.as_str(), factory.clone()))
                .ok_or_else(|| RegistryError::NoSuchPool(pool.to_string()));
        }

        let mut pools = self.pools.iter();
        match (pools.next(), pools.next()) {
            (Some((name, factory)), None) => Ok((name.as_str(), factory.clone())),
            (None, _) => Err(RegistryError::NoPools),
            _ => Err(RegistryError::AmbiguousPool(
                self.pools.keys().cloned().collect::<Vec<_>>().join(", "),
            )),
        }
    }

    fn directory(&self) -> RegistryResult<Vec<UnitRecord>> {
        Ok(self.storage.get(DIRECTORY_KEY)?.unwrap_or_default())
    }

    fn replace_directory(&self, directory: &[UnitRecord]) -> RegistryResult<()> {
        self.storage.put(DIRECTORY_KEY, &directory)?;
        self.storage.sync()?;
        Ok(())
    }

    /// Start a unit and record it in the directory.
    ///
    /// The supervisor is told to start on every call; a unit that is
    /// already running is left alone by the supervisor itself. A second
    /// record for the same name is never added.
    pub async fn new_unit(&self, opts: StartupOptions, name: &str, pool: &str) -> RegistryResult<()> {
        let (pool_name, factory) = self.resolve_pool(pool)?;
        let unit = factory.unit(name)?;
        unit.start(&opts).await?;

        let _section = self.section.lock().await;
        let mut directory = self.directory()?;
        if directory.iter().any(|record| record.name == name) {
            debug!(unit = %name, pool = %pool_name, "unit already in directory");
            return Ok(());
        }

        directory.push(UnitRecord::new(name, pool_name, opts));
        self.replace_directory(&directory)?;
        info!(unit = %name, pool = %pool_name, "unit registered");
        Ok(())
    }

    fn lookup(&self, name: &str) -> RegistryResult<UnitRecord> {
        let mut matches: Vec<UnitRecord> = self
            .directory()?
            .into_iter()
            .filter(|record| record.name == name)
            .collect();

        match matches.len() {
            0 => Err(RegistryError::UnitNotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(RegistryError::DuplicateUnit {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Forward a request to the unit registered under `name`.
    pub async fn request_unit(&self, name: &str, request: UnitRequest) -> RegistryResult<UnitResponse> {
        let record = self.lookup(name)?;
        let (_, factory) = self.resolve_pool(&record.pool)?;
        let unit = factory.unit(&record.name)?;
        Ok(unit.forward(request, DEFAULT_UNIT_PORT).await?)
    }

    /// Snapshot of the directory.
    pub fn list_units(&self) -> RegistryResult<Vec<UnitRecord>> {
        self.directory()
    }

    /// Drop every record named `name`. Returns whether anything was removed.
    ///
    /// The unit itself is left running.
    pub async fn remove_unit(&self, name: &str) -> RegistryResult<bool> {
        let _section = self.section.lock().await;
        let mut directory = self.directory()?;
        let before = directory.len();
        directory.retain(|record| record.name != name);

        if directory.len() == before {
            return Ok(false);
        }
        self.replace_directory(&directory)?;
        info!(unit = %name, "unit removed from directory");
        Ok(true)
    }

    /// One reconciliation pass over the whole directory.
    ///
    /// Refreshes every record's `last_known_state` from its supervisor.
    /// Terminal units the retirement policy gives up on are destroyed and
    /// dropped. The new directory is written once at the end.
    pub async fn reconcile(&self) -> RegistryResult<ReconcileReport> {
        let _section = self.section.lock().await;
        let directory = self.directory()?;
        let mut kept = Vec::with_capacity(directory.len());
        let mut report = ReconcileReport::default();

        for mut record in directory {
            let Some(factory) = self.pools.get(&record.pool) else {
                warn!(unit = %record.name, pool = %record.pool, "record references unknown pool");
                kept.push(record);
                continue;
            };
            let observed = factory
                .unit(&record.name)
                .and_then(|unit| unit.state().map(|state| (unit, state)));
            let (unit, state) = match observed {
                Ok(observed) => observed,
                Err(e) => {
                    warn!(unit = %record.name, error = %e, "could not read unit state");
                    kept.push(record);
                    continue;
                }
            };
            record.last_known_state = state;

            if state.is_terminal() && (self.policy)(&record) {
                // The supervisor is inert after destroy even when a step
                // failed, so the record goes either way.
                if let Err(e) = unit.destroy().await {
                    error!(unit = %record.name, pool = %record.pool, error = %e, "unit destroy failed");
                }
                factory.evict(&record.name);
                info!(unit = %record.name, pool = %record.pool, %state, "terminal unit retired");
                report.removed.push(record.name);
                continue;
            }
            kept.push(record);
        }

        report.kept = kept.len();
        self.replace_directory(&kept)?;
        debug!(kept = report.kept, removed = report.removed.len(), "reconciliation pass complete");
        Ok(report)
    }

    /// Pick supervision back up after a restart: every recorded unit's
    /// supervisor is re-created and resumed. Returns how many resumed.
    pub async fn recover(&self) -> RegistryResult<usize> {
        let directory = self.directory()?;
        let mut resumed = 0;

        for record in &directory {
            let Some(factory) = self.pools.get(&record.pool) else {
                warn!(unit = %record.name, pool = %record.pool, "cannot recover unit of unknown pool");
                continue;
            };
            let outcome = match factory.unit(&record.name) {
                Ok(unit) => unit.resume().await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => resumed += 1,
                Err(e) => warn!(unit = %record.name, error = %e, "failed to resume unit"),
            }
        }

        self.arm_alarm()?;
        info!(resumed, total = directory.len(), "registry recovered");
        Ok(resumed)
    }

    /// Schedule the next reconciliation unless one is already pending.
    pub fn arm_alarm(&self) -> RegistryResult<()> {
        if self.storage.get_alarm()?.is_none() {
            let at = epoch_millis() + self.config.reconcile_interval.as_millis() as u64;
            self.storage.set_alarm(at)?;
        }
        Ok(())
    }

    /// One alarm wake-up: reconcile, then rearm however the pass went.
    pub async fn run_reconcile_cycle(&self) -> RegistryResult<ReconcileReport> {
        let reconciled = self.reconcile().await;
        let rearmed = self.arm_alarm();
        let report = reconciled?;
        rearmed?;
        Ok(report)
    }
}

impl AlarmHandler for FleetRegistry {
    fn on_alarm(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.run_reconcile_cycle().await {
                error!(error = %e, "reconciliation cycle failed");
            }
        })
    }
}
