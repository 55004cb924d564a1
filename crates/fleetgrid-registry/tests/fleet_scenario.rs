//! End-to-end fleet scenarios against fake runtimes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetgrid_health::HttpHealthCheck;
use fleetgrid_registry::{FleetRegistry, PoolMap, RegistryError, UnitFactory, UnitPool};
use fleetgrid_runtime::{FakeRuntime, FetchError, RuntimeError, UnitRuntime};
use fleetgrid_state::{AlarmDriver, ContainerState, StartupOptions, StateStore};
use fleetgrid_supervisor::SupervisorConfig;

type Fakes = Arc<Mutex<HashMap<String, FakeRuntime>>>;

fn fake_pool(name: &str, store: &StateStore, alarms: &AlarmDriver, fakes: &Fakes) -> Arc<UnitPool> {
    let fakes = fakes.clone();
    let pool = UnitPool::new(
        name,
        store,
        alarms.clone(),
        Arc::new(move |unit: &str| -> Result<Arc<dyn UnitRuntime>, RuntimeError> {
            let fake = fakes.lock().unwrap().entry(unit.to_string()).or_default().clone();
            Ok(Arc::new(fake))
        }),
    )
    .with_health_check(Arc::new(HttpHealthCheck::default()))
    .with_config(SupervisorConfig {
        probe_interval: Duration::from_millis(50),
        monitor_retry_delay: Duration::ZERO,
    });
    Arc::new(pool)
}

async fn wait_for_state(pool: &UnitPool, unit: &str, want: ContainerState) {
    let supervisor = pool.unit(unit).unwrap();
    for _ in 0..200 {
        if supervisor.state().unwrap() == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{unit} never reached {want}");
}

#[tokio::test]
async fn unit_lifecycle_from_creation_to_retirement() {
    let store = StateStore::open_in_memory().unwrap();
    let alarms = AlarmDriver::new(store.clone());
    let fakes = Fakes::default();
    let large = fake_pool("large", &store, &alarms, &fakes);

    let mut pools = PoolMap::new();
    pools.insert("large".to_string(), large.clone());
    let registry = FleetRegistry::new(pools, &store, alarms.clone()).activate().unwrap();

    registry
        .new_unit(StartupOptions::with_entrypoint(["/server"]), "job-a", "large")
        .await
        .unwrap();
    let units = registry.list_units().unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].last_known_state, ContainerState::Starting);

    let fake = fakes.lock().unwrap()["job-a"].clone();
    let supervisor = large.unit("job-a").unwrap();

    fake.refuse_with(FetchError::NotListening);
    supervisor.run_probe_cycle().await.unwrap();
    assert_eq!(supervisor.state().unwrap(), ContainerState::Starting);

    fake.reset_fetch();
    supervisor.run_probe_cycle().await.unwrap();
    assert_eq!(supervisor.state().unwrap(), ContainerState::Running);

    fake.exit();
    wait_for_state(&large, "job-a", ContainerState::Stopped).await;

    let report = registry.reconcile().await.unwrap();
    assert_eq!(report.removed, vec!["job-a".to_string()]);
    assert!(registry.list_units().unwrap().is_empty());
    assert!(fake.is_destroyed());
    assert!(supervisor.is_destroyed());
    assert_eq!(large.unit_count(), 0);
}

#[tokio::test]
async fn stopped_unit_probed_before_reconciliation_is_retired() {
    let store = StateStore::open_in_memory().unwrap();
    let alarms = AlarmDriver::new(store.clone());
    let fakes = Fakes::default();
    let large = fake_pool("large", &store, &alarms, &fakes);

    let mut pools = PoolMap::new();
    pools.insert("large".to_string(), large.clone());
    let registry = FleetRegistry::new(pools, &store, alarms.clone()).activate().unwrap();
    registry
        .new_unit(StartupOptions::default(), "job-a", "large")
        .await
        .unwrap();

    let fake = fakes.lock().unwrap()["job-a"].clone();
    let supervisor = large.unit("job-a").unwrap();
    fake.exit();
    wait_for_state(&large, "job-a", ContainerState::Stopped).await;

    // The probe timer fires first; the unit has no process left to answer.
    supervisor.run_probe_cycle().await.unwrap();
    supervisor.run_probe_cycle().await.unwrap();
    assert_eq!(supervisor.state().unwrap(), ContainerState::Stopped);

    let report = registry.reconcile().await.unwrap();
    assert_eq!(report.removed, vec!["job-a".to_string()]);
    assert!(registry.list_units().unwrap().is_empty());
    assert_eq!(large.unit_count(), 0);
}

#[tokio::test]
async fn alarm_loop_drives_probes_and_reconciliation() {
    let store = StateStore::open_in_memory().unwrap();
    let alarms = AlarmDriver::new(store.clone());
    let fakes = Fakes::default();
    let large = fake_pool("large", &store, &alarms, &fakes);

    let mut pools = PoolMap::new();
    pools.insert("large".to_string(), large.clone());
    let registry = FleetRegistry::new(pools, &store, alarms.clone()).activate().unwrap();
    registry
        .new_unit(StartupOptions::default(), "job-a", "large")
        .await
        .unwrap();

    let fake = fakes.lock().unwrap()["job-a"].clone();
    fake.respond_with(http::StatusCode::INTERNAL_SERVER_ERROR, "broken");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let driver = alarms.clone();
    let alarm_loop = tokio::spawn(async move { driver.run(Duration::from_millis(10), shutdown_rx).await });

    wait_for_state(&large, "job-a", ContainerState::Unhealthy).await;

    shutdown_tx.send(true).unwrap();
    alarm_loop.await.unwrap();
}

#[tokio::test]
async fn empty_pool_name_needs_a_single_pool() {
    let store = StateStore::open_in_memory().unwrap();
    let alarms = AlarmDriver::new(store.clone());
    let fakes = Fakes::default();

    let mut pools = PoolMap::new();
    pools.insert("small".to_string(), fake_pool("small", &store, &alarms, &fakes));
    let single = FleetRegistry::new(pools.clone(), &store, alarms.clone());
    assert_eq!(single.resolve_pool("").unwrap().0, "small");

    pools.insert("large".to_string(), fake_pool("large", &store, &alarms, &fakes));
    let pair = FleetRegistry::new(pools, &store, alarms.clone());
    assert!(matches!(pair.resolve_pool(""), Err(RegistryError::AmbiguousPool(_))));
}
