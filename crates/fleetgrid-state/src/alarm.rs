//! Alarm driver: the scheduled wake-up primitive for actors.
//!
//! Each actor holds at most one pending alarm in the `ALARMS` table. The
//! `AlarmDriver` polls the table, clears every due alarm whose actor has a
//! registered handler, and runs that handler on its own task. Handlers are
//! expected to rearm themselves.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StateResult;
use crate::store::StateStore;

/// Boxed, sendable future used at the actor trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that wants to be woken when its alarm fires.
pub trait AlarmHandler: Send + Sync {
    fn on_alarm(&self) -> BoxFuture<'_, ()>;
}

/// Dispatches stored alarms to registered handlers.
#[derive(Clone)]
pub struct AlarmDriver {
    store: StateStore,
    /// Registered handlers: actor_id → handler.
    handlers: Arc<RwLock<HashMap<String, Arc<dyn AlarmHandler>>>>,
}

impl AlarmDriver {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register (or replace) the handler for an actor.
    pub fn register(&self, actor_id: &str, handler: Arc<dyn AlarmHandler>) {
        let mut handlers = self.handlers.write().expect("alarm handlers lock");
        handlers.insert(actor_id.to_string(), handler);
        debug!(%actor_id, "alarm handler registered");
    }

    pub fn unregister(&self, actor_id: &str) {
        let mut handlers = self.handlers.write().expect("alarm handlers lock");
        if handlers.remove(actor_id).is_some() {
            debug!(%actor_id, "alarm handler unregistered");
        }
    }

    pub fn is_registered(&self, actor_id: &str) -> bool {
        let handlers = self.handlers.read().expect("alarm handlers lock");
        handlers.contains_key(actor_id)
    }

    /// Fire every alarm due at `now_millis`.
    ///
    /// The alarm is cleared before its handler runs, so a handler that
    /// rearms is never racing its own stale entry. Alarms of actors with no
    /// registered handler stay pending.
    pub fn fire_due(&self, now_millis: u64) -> StateResult<Vec<JoinHandle<()>>> {
        let due = self.store.due_alarms(now_millis)?;
        let mut spawned = Vec::with_capacity(due.len());

        for (actor_id, at) in due {
            let handler = {
                let handlers = self.handlers.read().expect("alarm handlers lock");
                handlers.get(&actor_id).cloned()
            };
            let Some(handler) = handler else {
                debug!(%actor_id, "alarm due but no handler registered");
                continue;
            };

            self.store.actor(&actor_id).delete_alarm()?;
            debug!(%actor_id, at, lag_ms = now_millis.saturating_sub(at), "alarm fired");
            spawned.push(tokio::spawn(async move {
                handler.on_alarm().await;
            }));
        }

        Ok(spawned)
    }

    /// Poll for due alarms every `tick` until `shutdown` flips.
    pub async fn run(&self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        info!(tick_ms = tick.as_millis() as u64, "alarm driver started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.fire_due(crate::epoch_millis()) {
                        warn!(error = %e, "alarm dispatch failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("alarm driver shutting down");
                    break;
                }
            }
        }
    }
}
