//! fleetgrid-state: durable actor storage for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the fleet's actors (unit supervisors and the registry).
//!
//! # Architecture
//!
//! ```text
//! StateStore (Arc<Database>)
//!   ├── ACTOR_KV  (actor_id, key) → JSON value
//!   └── ALARMS    actor_id → wake-up time (epoch ms)
//!
//! ActorStorage   per-actor view: get/put/delete/sync + one alarm
//! AlarmDriver    fires due alarms into registered AlarmHandlers
//! ```
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` and can be shared across
//! async tasks. Each actor only ever touches its own namespace.

pub mod alarm;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use alarm::{AlarmDriver, AlarmHandler, BoxFuture};
pub use error::{StateError, StateResult};
pub use store::{ActorStorage, StateStore};
pub use types::*;

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
