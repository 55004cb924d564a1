//! Probe outcome classification and the probe transition table.

use tracing::warn;

use fleetgrid_state::ContainerState;

use crate::check::{HealthError, HealthReport};

/// The unit answered its health endpoint successfully.
pub const OK: &str = "ok";
/// The unit's process exists but its port does not accept connections.
pub const NOT_LISTENING: &str = "not_listening";
/// No process has been provisioned for the unit yet.
pub const NO_CONTAINER_YET: &str = "no_container_yet";

/// Result of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The check reported `"ok"`.
    Healthy,
    /// The unit is still booting (`"not_listening"` / `"no_container_yet"`).
    Booting,
    /// The unit answered, unhealthy.
    Unhealthy,
    /// The check reported a status string nobody knows.
    Unexpected(String),
    /// The check could not be issued.
    Failed(String),
}

impl ProbeResult {
    /// Classify what a health check returned. An unhealthy response's body
    /// is dropped here.
    pub fn classify(outcome: Result<HealthReport, HealthError>) -> Self {
        match outcome {
            Err(e) => Self::Failed(e.to_string()),
            Ok(HealthReport::Response(_)) => Self::Unhealthy,
            Ok(HealthReport::Status(status)) => match status.as_str() {
                OK => Self::Healthy,
                NOT_LISTENING | NO_CONTAINER_YET => Self::Booting,
                _ => Self::Unexpected(status),
            },
        }
    }
}

/// Next state of a unit in `current` after a probe, or `None` when the
/// probe leaves the state untouched.
///
/// | probe      | next state                                   |
/// |------------|----------------------------------------------|
/// | Healthy    | `running`                                    |
/// | Booting    | `starting`                                   |
/// | Unhealthy  | `unhealthy`                                  |
/// | Failed     | `failed`, unless `current` is `starting`     |
/// | Unexpected | unchanged                                    |
pub fn next_state(current: ContainerState, probe: &ProbeResult) -> Option<ContainerState> {
    match probe {
        ProbeResult::Healthy => Some(ContainerState::Running),
        ProbeResult::Booting => Some(ContainerState::Starting),
        ProbeResult::Unhealthy => Some(ContainerState::Unhealthy),
        // Still booting: probe errors are expected.
        ProbeResult::Failed(_) if current == ContainerState::Starting => None,
        ProbeResult::Failed(_) => Some(ContainerState::Failed),
        ProbeResult::Unexpected(status) => {
            warn!(%status, %current, "unexpected health check status");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ContainerState::*;

    const ALL: [ContainerState; 6] = [Starting, Running, Unhealthy, Stopped, Failed, Unknown];

    fn unhealthy_response() -> HealthReport {
        let mut resp = http::Response::new(Bytes::from_static(b"db down"));
        *resp.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
        HealthReport::Response(resp)
    }

    #[test]
    fn classify_sentinels() {
        assert_eq!(ProbeResult::classify(Ok(HealthReport::status(OK))), ProbeResult::Healthy);
        assert_eq!(
            ProbeResult::classify(Ok(HealthReport::status(NOT_LISTENING))),
            ProbeResult::Booting
        );
        assert_eq!(
            ProbeResult::classify(Ok(HealthReport::status(NO_CONTAINER_YET))),
            ProbeResult::Booting
        );
        assert_eq!(
            ProbeResult::classify(Ok(HealthReport::status("degraded"))),
            ProbeResult::Unexpected("degraded".to_string())
        );
    }

    #[test]
    fn classify_response_and_error() {
        assert_eq!(ProbeResult::classify(Ok(unhealthy_response())), ProbeResult::Unhealthy);
        assert!(matches!(
            ProbeResult::classify(Err(HealthError::Other("boom".to_string()))),
            ProbeResult::Failed(_)
        ));
    }

    #[test]
    fn ok_means_running_from_any_state() {
        for current in ALL {
            assert_eq!(next_state(current, &ProbeResult::Healthy), Some(Running));
        }
    }

    #[test]
    fn booting_means_starting_from_any_state() {
        for current in ALL {
            assert_eq!(next_state(current, &ProbeResult::Booting), Some(Starting));
        }
    }

    #[test]
    fn unhealthy_answer_means_unhealthy() {
        for current in ALL {
            assert_eq!(next_state(current, &ProbeResult::Unhealthy), Some(Unhealthy));
        }
    }

    #[test]
    fn probe_error_fails_unless_starting() {
        let failed = ProbeResult::Failed("connect timeout".to_string());
        assert_eq!(next_state(Starting, &failed), None);
        for current in [Running, Unhealthy, Stopped, Failed, Unknown] {
            assert_eq!(next_state(current, &failed), Some(Failed), "from {current}");
        }
    }

    #[test]
    fn unexpected_status_leaves_state() {
        let odd = ProbeResult::Unexpected("maybe".to_string());
        for current in ALL {
            assert_eq!(next_state(current, &odd), None);
        }
    }

    #[test]
    fn boot_sequence() {
        // not_listening, error while booting, ok, unhealthy answer, ok, error.
        let probes = [
            ProbeResult::Booting,
            ProbeResult::Failed("refused".to_string()),
            ProbeResult::Healthy,
            ProbeResult::Unhealthy,
            ProbeResult::Healthy,
            ProbeResult::Failed("refused".to_string()),
        ];
        let mut state = Running;
        let mut seen = Vec::new();
        for probe in &probes {
            if let Some(next) = next_state(state, probe) {
                state = next;
            }
            seen.push(state);
        }
        assert_eq!(seen, vec![Starting, Starting, Running, Unhealthy, Running, Failed]);
    }
}
