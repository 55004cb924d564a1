//! Process-backed fleet tests.
//!
//! Wires real `ProcessRuntime` pools into a registry and drives units that
//! exit on their own or have to be torn down.

use std::sync::Arc;
use std::time::Duration;

use fleetgrid_registry::{FleetRegistry, PoolMap, UnitFactory, UnitPool};
use fleetgrid_runtime::{ProcessConfig, ProcessRuntime, RuntimeError, UnitRuntime};
use fleetgrid_state::{AlarmDriver, ContainerState, StartupOptions, StateStore};
use fleetgrid_supervisor::SupervisorConfig;

fn shell_pool(name: &str, script: &str, store: &StateStore, alarms: &AlarmDriver) -> Arc<UnitPool> {
    let template = ProcessConfig {
        args: vec!["-c".to_string(), script.to_string()],
        ..ProcessConfig::new("/bin/sh", 19100)
    };
    let pool = UnitPool::new(
        name,
        store,
        alarms.clone(),
        Arc::new(move |unit: &str| -> Result<Arc<dyn UnitRuntime>, RuntimeError> {
            Ok(Arc::new(ProcessRuntime::new(unit, template.clone())))
        }),
    )
    .with_config(SupervisorConfig {
        probe_interval: Duration::from_secs(60),
        monitor_retry_delay: Duration::ZERO,
    });
    Arc::new(pool)
}

async fn wait_for_state(pool: &UnitPool, unit: &str, want: ContainerState) {
    let supervisor = pool.unit(unit).unwrap();
    for _ in 0..400 {
        if supervisor.state().unwrap() == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{unit} never reached {want}");
}

#[tokio::test]
async fn exited_process_is_stopped_and_retired() {
    let store = StateStore::open_in_memory().unwrap();
    let alarms = AlarmDriver::new(store.clone());
    let oneshot = shell_pool("oneshot", "exit 0", &store, &alarms);

    let mut pools = PoolMap::new();
    pools.insert("oneshot".to_string(), oneshot.clone());
    let registry = FleetRegistry::new(pools, &store, alarms.clone()).activate().unwrap();

    registry
        .new_unit(StartupOptions::default(), "batch-1", "")
        .await
        .unwrap();
    wait_for_state(&oneshot, "batch-1", ContainerState::Stopped).await;

    let report = registry.reconcile().await.unwrap();
    assert_eq!(report.removed, vec!["batch-1".to_string()]);
    assert!(registry.list_units().unwrap().is_empty());
}

#[tokio::test]
async fn long_running_process_stays_running_until_destroyed() {
    let store = StateStore::open_in_memory().unwrap();
    let alarms = AlarmDriver::new(store.clone());
    let service = shell_pool("service", "sleep 30", &store, &alarms);

    let mut pools = PoolMap::new();
    pools.insert("service".to_string(), service.clone());
    let registry = FleetRegistry::new(pools, &store, alarms.clone()).activate().unwrap();

    registry
        .new_unit(StartupOptions::default(), "web", "service")
        .await
        .unwrap();

    let report = registry.reconcile().await.unwrap();
    assert_eq!(report.kept, 1);
    assert_eq!(registry.list_units().unwrap()[0].last_known_state, ContainerState::Running);

    let supervisor = service.unit("web").unwrap();
    assert!(supervisor.monitor_attached());
    supervisor.destroy().await.unwrap();
    assert!(supervisor.is_destroyed());
    assert!(!alarms.is_registered("unit/service/web"));
}

#[tokio::test]
async fn crashing_process_is_stopped_then_kept_by_policy() {
    let store = StateStore::open_in_memory().unwrap();
    let alarms = AlarmDriver::new(store.clone());
    let crashy = shell_pool("crashy", "exit 3", &store, &alarms);

    let mut pools = PoolMap::new();
    pools.insert("crashy".to_string(), crashy.clone());
    let registry = FleetRegistry::new(pools, &store, alarms.clone())
        .with_policy(fleetgrid_registry::keep_terminal())
        .activate()
        .unwrap();

    registry
        .new_unit(StartupOptions::with_entrypoint(["ignored"]), "job", "crashy")
        .await
        .unwrap();
    wait_for_state(&crashy, "job", ContainerState::Stopped).await;

    registry.reconcile().await.unwrap();
    let units = registry.list_units().unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].last_known_state, ContainerState::Stopped);
}
