//! redb table definitions for the FleetGrid state store.

use redb::TableDefinition;

/// Actor-scoped values keyed by `(actor_id, key)`, JSON-serialized.
pub const ACTOR_KV: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("actor_kv");

/// Pending wake-up per actor, keyed by `actor_id`, value is epoch millis.
pub const ALARMS: TableDefinition<&str, u64> = TableDefinition::new("alarms");
