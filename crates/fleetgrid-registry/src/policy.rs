//! Retirement policies for units found in a terminal state.

use std::sync::Arc;

use fleetgrid_state::UnitRecord;

/// Decides whether a terminal unit is destroyed and dropped from the
/// directory (`true`) or kept for inspection (`false`).
///
/// The record passed in already carries the freshly observed state.
pub type RetirementPolicy = Arc<dyn Fn(&UnitRecord) -> bool + Send + Sync>;

/// Destroy and forget every terminal unit.
pub fn always_remove() -> RetirementPolicy {
    Arc::new(|_: &UnitRecord| true)
}

/// Never restart terminal units, but keep their records.
pub fn keep_terminal() -> RetirementPolicy {
    Arc::new(|_: &UnitRecord| false)
}
