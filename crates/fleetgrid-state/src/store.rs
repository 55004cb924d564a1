//! StateStore: redb-backed actor storage for FleetGrid.
//!
//! Every actor owns a namespace of JSON values plus at most one pending
//! alarm. Writes are committed in their own redb write transaction with
//! immediate durability. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ACTOR_KV).map_err(map_err!(Table))?;
        txn.open_table(ALARMS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Storage view scoped to a single actor.
    pub fn actor(&self, actor_id: &str) -> ActorStorage {
        ActorStorage {
            store: self.clone(),
            actor_id: actor_id.to_string(),
        }
    }

    // ── Actor values ───────────────────────────────────────────────

    fn get_value<T: DeserializeOwned>(&self, actor_id: &str, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTOR_KV).map_err(map_err!(Table))?;
        match table.get((actor_id, key)).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_value<T: Serialize>(&self, actor_id: &str, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTOR_KV).map_err(map_err!(Table))?;
            table
                .insert((actor_id, key), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%actor_id, %key, "actor value stored");
        Ok(())
    }

    fn delete_value(&self, actor_id: &str, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ACTOR_KV).map_err(map_err!(Table))?;
            existed = table.remove((actor_id, key)).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn delete_actor_values(&self, actor_id: &str) -> StateResult<u32> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ACTOR_KV).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                let (owner, name) = key.value();
                if owner == actor_id {
                    keys.push(name.to_string());
                }
            }
            keys
        };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTOR_KV).map_err(map_err!(Table))?;
            for key in &keys {
                table
                    .remove((actor_id, key.as_str()))
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%actor_id, removed = keys.len(), "actor values erased");
        Ok(keys.len() as u32)
    }

    /// Force a durable commit point. All earlier commits are on disk once
    /// this returns.
    fn barrier(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Alarms ─────────────────────────────────────────────────────

    fn get_alarm(&self, actor_id: &str) -> StateResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALARMS).map_err(map_err!(Table))?;
        Ok(table
            .get(actor_id)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value()))
    }

    fn set_alarm(&self, actor_id: &str, at_millis: u64) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ALARMS).map_err(map_err!(Table))?;
            table.insert(actor_id, at_millis).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%actor_id, at_millis, "alarm set");
        Ok(())
    }

    fn delete_alarm(&self, actor_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ALARMS).map_err(map_err!(Table))?;
            existed = table.remove(actor_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// All alarms due at or before `now_millis`, as `(actor_id, at)`.
    pub fn due_alarms(&self, now_millis: u64) -> StateResult<Vec<(String, u64)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALARMS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let at = value.value();
            if at <= now_millis {
                results.push((key.value().to_string(), at));
            }
        }
        Ok(results)
    }
}

/// A single actor's slice of the state store.
///
/// Cheap to clone; all clones address the same namespace.
#[derive(Clone)]
pub struct ActorStorage {
    store: StateStore,
    actor_id: String,
}

impl ActorStorage {
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<T>> {
        self.store.get_value(&self.actor_id, key)
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> StateResult<()> {
        self.store.put_value(&self.actor_id, key, value)
    }

    /// Delete one value. Returns true if it existed.
    pub fn delete(&self, key: &str) -> StateResult<bool> {
        self.store.delete_value(&self.actor_id, key)
    }

    /// Erase every value this actor stored. Returns the number removed.
    pub fn delete_all(&self) -> StateResult<u32> {
        self.store.delete_actor_values(&self.actor_id)
    }

    /// Wait until every write issued so far is durable.
    pub fn sync(&self) -> StateResult<()> {
        self.store.barrier()
    }

    pub fn get_alarm(&self) -> StateResult<Option<u64>> {
        self.store.get_alarm(&self.actor_id)
    }

    /// Set (or move) this actor's single pending wake-up.
    pub fn set_alarm(&self, at_millis: u64) -> StateResult<()> {
        self.store.set_alarm(&self.actor_id, at_millis)
    }

    /// Cancel the pending wake-up. Returns true if one was set.
    pub fn delete_alarm(&self) -> StateResult<bool> {
        self.store.delete_alarm(&self.actor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn test_record(name: &str) -> UnitRecord {
        UnitRecord::new(name, "small", StartupOptions::default())
    }

    // ── Actor values ───────────────────────────────────────────────

    #[test]
    fn value_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let actor = store.actor("unit/small/a");

        actor.put(STATE_KEY, &ContainerState::Running).unwrap();
        let state: Option<ContainerState> = actor.get(STATE_KEY).unwrap();
        assert_eq!(state, Some(ContainerState::Running));
    }

    #[test]
    fn missing_value_reads_as_none() {
        let store = StateStore::open_in_memory().unwrap();
        let state: Option<ContainerState> = store.actor("nobody").get(STATE_KEY).unwrap();
        assert!(state.is_none());
        assert_eq!(state.unwrap_or_default(), ContainerState::Unknown);
    }

    #[test]
    fn actors_are_isolated() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.actor("unit/small/a");
        let b = store.actor("unit/small/b");

        a.put(STATE_KEY, &ContainerState::Failed).unwrap();
        let from_b: Option<ContainerState> = b.get(STATE_KEY).unwrap();
        assert!(from_b.is_none());
    }

    #[test]
    fn directory_replaced_as_one_value() {
        let store = StateStore::open_in_memory().unwrap();
        let registry = store.actor("registry");

        registry
            .put(DIRECTORY_KEY, &vec![test_record("a"), test_record("b")])
            .unwrap();
        registry.put(DIRECTORY_KEY, &vec![test_record("c")]).unwrap();

        let units: Vec<UnitRecord> = registry.get(DIRECTORY_KEY).unwrap().unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "c");
    }

    #[test]
    fn delete_single_value() {
        let store = StateStore::open_in_memory().unwrap();
        let actor = store.actor("a");
        actor.put("k", &1u32).unwrap();

        assert!(actor.delete("k").unwrap());
        assert!(!actor.delete("k").unwrap());
    }

    #[test]
    fn delete_all_only_touches_own_namespace() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.actor("a");
        let b = store.actor("b");
        a.put("x", &1u32).unwrap();
        a.put("y", &2u32).unwrap();
        b.put("x", &3u32).unwrap();

        assert_eq!(a.delete_all().unwrap(), 2);
        assert!(a.get::<u32>("x").unwrap().is_none());
        assert_eq!(b.get::<u32>("x").unwrap(), Some(3));
    }

    #[test]
    fn sync_succeeds_after_writes() {
        let store = StateStore::open_in_memory().unwrap();
        let actor = store.actor("a");
        actor.put("k", &"v").unwrap();
        actor.sync().unwrap();
        assert_eq!(actor.get::<String>("k").unwrap().as_deref(), Some("v"));
    }

    // ── Alarms ─────────────────────────────────────────────────────

    #[test]
    fn alarm_set_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let actor = store.actor("registry");

        assert!(actor.get_alarm().unwrap().is_none());
        actor.set_alarm(5_000).unwrap();
        assert_eq!(actor.get_alarm().unwrap(), Some(5_000));

        actor.set_alarm(7_000).unwrap();
        assert_eq!(actor.get_alarm().unwrap(), Some(7_000));

        assert!(actor.delete_alarm().unwrap());
        assert!(!actor.delete_alarm().unwrap());
    }

    #[test]
    fn due_alarms_filters_by_time() {
        let store = StateStore::open_in_memory().unwrap();
        store.actor("early").set_alarm(1_000).unwrap();
        store.actor("exact").set_alarm(2_000).unwrap();
        store.actor("late").set_alarm(3_000).unwrap();

        let mut due: Vec<String> = store
            .due_alarms(2_000)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        due.sort();
        assert_eq!(due, vec!["early".to_string(), "exact".to_string()]);
    }

    #[test]
    fn delete_all_keeps_alarm() {
        let store = StateStore::open_in_memory().unwrap();
        let actor = store.actor("a");
        actor.put("k", &1u32).unwrap();
        actor.set_alarm(10).unwrap();

        actor.delete_all().unwrap();
        assert_eq!(actor.get_alarm().unwrap(), Some(10));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            let registry = store.actor("registry");
            registry.put(DIRECTORY_KEY, &vec![test_record("job-a")]).unwrap();
            registry.set_alarm(42).unwrap();
            registry.sync().unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let registry = store.actor("registry");
        let units: Vec<UnitRecord> = registry.get(DIRECTORY_KEY).unwrap().unwrap();
        assert_eq!(units[0].name, "job-a");
        assert_eq!(registry.get_alarm().unwrap(), Some(42));
    }
}
