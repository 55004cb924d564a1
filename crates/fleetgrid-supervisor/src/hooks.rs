//! Transition hooks.

use fleetgrid_state::ContainerState;

/// Called around every state transition of a unit, inside the
/// supervisor's exclusive section.
///
/// Both methods default to no-ops.
pub trait StateHooks: Send + Sync {
    fn pre_state_change(&self, _unit: &str, _old: ContainerState, _new: ContainerState) {}

    fn post_state_change(&self, _unit: &str, _old: ContainerState, _new: ContainerState) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl StateHooks for NoHooks {}
