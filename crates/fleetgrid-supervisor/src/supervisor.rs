//! UnitSupervisor: the per-unit lifecycle actor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fleetgrid_health::{next_state, HealthCheck, ProbeResult};
use fleetgrid_runtime::{normalize_scheme, RuntimeError, UnitRequest, UnitResponse, UnitRuntime};
use fleetgrid_state::{
    epoch_millis, unit_actor_id, ActorStorage, AlarmDriver, AlarmHandler, BoxFuture, ContainerState,
    StartupOptions, StateStore, STATE_KEY,
};

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::hooks::{NoHooks, StateHooks};

/// Supervises one unit: owns its persisted state, its monitor task and its
/// probe alarm.
pub struct UnitSupervisor {
    name: String,
    pool: String,
    runtime: Arc<dyn UnitRuntime>,
    health_check: Option<Arc<dyn HealthCheck>>,
    hooks: Arc<dyn StateHooks>,
    storage: ActorStorage,
    alarms: AlarmDriver,
    config: SupervisorConfig,
    /// Exclusive section. Held across every read-then-write of the state.
    transition: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl UnitSupervisor {
    pub fn new(
        pool: &str,
        name: &str,
        runtime: Arc<dyn UnitRuntime>,
        store: &StateStore,
        alarms: AlarmDriver,
    ) -> Self {
        Self {
            name: name.to_string(),
            pool: pool.to_string(),
            runtime,
            health_check: None,
            hooks: Arc::new(NoHooks),
            storage: store.actor(&unit_actor_id(pool, name)),
            alarms,
            config: SupervisorConfig::default(),
            transition: tokio::sync::Mutex::new(()),
            monitor: Mutex::new(None),
            destroyed: AtomicBool::new(false),
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

    /// Wrap the supervisor and register it with the alarm driver.
    pub fn activate(self) -> Arc<Self> {
        let supervisor = Arc::new(self);
        supervisor
            .alarms
            .register(supervisor.actor_id(), supervisor.clone());
        supervisor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn actor_id(&self) -> &str {
        self.storage.actor_id()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> SupervisorResult<()> {
        if self.is_destroyed() {
            return Err(SupervisorError::Destroyed);
        }
        Ok(())
    }

    /// Persisted state; `unknown` when nothing has been stored yet.
    pub fn state(&self) -> SupervisorResult<ContainerState> {
        self.ensure_live()?;
        Ok(self.storage.get(STATE_KEY)?.unwrap_or_default())
    }

    /// Whether a monitor task is currently watching the unit.
    pub fn monitor_attached(&self) -> bool {
        let slot = self.monitor.lock().expect("monitor slot lock");
        slot.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Start the unit, or re-attach to one that is already running.
    ///
    /// A unit whose process is already executing is not launched again: the
    /// supervisor only makes sure a monitor watches it.
    pub async fn start(self: &Arc<Self>, opts: &StartupOptions) -> SupervisorResult<()> {
        self.ensure_live()?;
        let _section = self.transition.lock().await;
        self.ensure_live()?;

        if self.runtime.running() {
            if self.monitor_attached() {
                debug!(unit = %self.name, pool = %self.pool, "unit already running");
            } else {
                info!(unit = %self.name, pool = %self.pool, "re-attaching monitor to running unit");
                self.attach_monitor(Duration::ZERO);
            }
            self.arm_alarm()?;
            return Ok(());
        }

        self.runtime.start(opts).await?;
        self.set_state(ContainerState::Running)?;
        self.attach_monitor(Duration::ZERO);
        self.arm_alarm()?;

        info!(unit = %self.name, pool = %self.pool, "unit started");
        Ok(())
    }

    /// Pick supervision back up after a restart of the host process.
    ///
    /// Attaches a monitor if the unit's process is still executing and makes
    /// sure a probe alarm is pending. A unit recorded as running whose
    /// process is gone is marked `stopped`. Never launches anything.
    pub async fn resume(self: &Arc<Self>) -> SupervisorResult<()> {
        self.ensure_live()?;
        let _section = self.transition.lock().await;
        self.ensure_live()?;

        if self.runtime.running() {
            if !self.monitor_attached() {
                info!(unit = %self.name, pool = %self.pool, "resuming supervision of running unit");
                self.attach_monitor(Duration::ZERO);
            }
        } else if matches!(self.state()?, ContainerState::Running | ContainerState::Unhealthy) {
            info!(unit = %self.name, pool = %self.pool, "unit process gone while unsupervised");
            self.set_state(ContainerState::Stopped)?;
        }
        self.arm_alarm()
    }

    /// Forward a request to the unit's `port`, downgrading a secure scheme.
    pub async fn forward(&self, request: UnitRequest, port: u16) -> SupervisorResult<UnitResponse> {
        self.ensure_live()?;
        let request = normalize_scheme(request);
        Ok(self.runtime.fetch(port, request).await?)
    }

    /// Stop supervising for good: erase the unit's storage and alarm, tear
    /// down its process and unregister from the alarm driver.
    ///
    /// The supervisor is inert afterwards even when a step failed; the first
    /// failure is returned.
    pub async fn destroy(&self) -> SupervisorResult<()> {
        self.ensure_live()?;
        let _section = self.transition.lock().await;
        self.ensure_live()?;

        let erased = self
            .storage
            .delete_all()
            .and_then(|_| self.storage.delete_alarm());
        let killed = self.runtime.destroy().await;
        self.terminate();

        info!(unit = %self.name, pool = %self.pool, "unit destroyed");
        erased?;
        killed?;
        Ok(())
    }

    fn terminate(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.monitor.lock().expect("monitor slot lock").take() {
            handle.abort();
        }
        self.alarms.unregister(self.actor_id());
    }

    /// Schedule the next probe unless one is already pending.
    pub fn arm_alarm(&self) -> SupervisorResult<()> {
        self.ensure_live()?;
        if self.storage.get_alarm()?.is_none() {
            let at = epoch_millis() + self.config.probe_interval.as_millis() as u64;
            self.storage.set_alarm(at)?;
        }
        Ok(())
    }

    /// One alarm wake-up: probe the unit, then rearm however the probe went.
    pub async fn run_probe_cycle(&self) -> SupervisorResult<()> {
        let probed = self.probe().await;
        let rearmed = self.arm_alarm();
        probed.and(rearmed)
    }

    async fn probe(&self) -> SupervisorResult<()> {
        self.ensure_live()?;
        let _section = self.transition.lock().await;

        let current = self.state()?;
        let Some(check) = &self.health_check else {
            return Ok(());
        };
        // Only an explicit start leaves a terminal state.
        if current.is_terminal() {
            debug!(unit = %self.name, %current, "terminal unit not probed");
            return Ok(());
        }

        let probe = ProbeResult::classify(check.check(self.runtime.as_ref()).await);
        debug!(unit = %self.name, %current, ?probe, "health probe completed");

        if let Some(next) = next_state(current, &probe) {
            self.set_state(next)?;
        }
        Ok(())
    }

    /// Persist a transition. Callers hold the exclusive section.
    fn set_state(&self, new: ContainerState) -> SupervisorResult<()> {
        let old = self.state()?;
        if old == new {
            return Ok(());
        }

        self.hooks.pre_state_change(&self.name, old, new);
        self.storage.put(STATE_KEY, &new)?;
        self.storage.sync()?;
        info!(unit = %self.name, pool = %self.pool, from = %old, to = %new, "unit state changed");
        self.hooks.post_state_change(&self.name, old, new);
        Ok(())
    }

    fn attach_monitor(self: &Arc<Self>, delay: Duration) {
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let exit = supervisor.runtime.monitor().await;
            supervisor.on_monitor_exit(exit).await;
        });

        let previous = self.monitor.lock().expect("monitor slot lock").replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn on_monitor_exit(self: Arc<Self>, exit: Result<(), RuntimeError>) {
        if self.is_destroyed() {
            return;
        }
        let _section = self.transition.lock().await;
        if self.is_destroyed() {
            return;
        }
        // This task is finishing; clear the slot without aborting it.
        drop(self.monitor.lock().expect("monitor slot lock").take());

        let outcome = match exit {
            Err(e) => {
                error!(unit = %self.name, pool = %self.pool, error = %e, "unit monitor failed");
                self.set_state(ContainerState::Failed)
            }
            Ok(()) => match self.state() {
                Ok(ContainerState::Running | ContainerState::Unhealthy) => {
                    info!(unit = %self.name, pool = %self.pool, "unit exited");
                    self.set_state(ContainerState::Stopped)
                }
                Ok(ContainerState::Starting) => {
                    debug!(unit = %self.name, "unit exited while starting, watching again");
                    self.attach_monitor(self.config.monitor_retry_delay);
                    Ok(())
                }
                Ok(ContainerState::Failed) => {
                    warn!(unit = %self.name, pool = %self.pool, "failed unit exited");
                    Ok(())
                }
                Ok(state) => {
                    debug!(unit = %self.name, %state, "unit exit ignored");
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        if let Err(e) = outcome {
            error!(unit = %self.name, error = %e, "failed to record unit exit");
        }
    }
}

impl AlarmHandler for UnitSupervisor {
    fn on_alarm(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self.run_probe_cycle().await {
                Ok(()) | Err(SupervisorError::Destroyed) => {}
                Err(e) => error!(unit = %self.name, error = %e, "probe cycle failed"),
            }
        })
    }
}
