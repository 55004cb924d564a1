//! Health check capability and the default HTTP check.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use fleetgrid_runtime::{FetchError, UnitResponse, UnitRuntime, DEFAULT_UNIT_PORT};
use fleetgrid_state::BoxFuture;

use crate::checker::{NOT_LISTENING, NO_CONTAINER_YET, OK};

/// What a health check reported.
#[derive(Debug)]
pub enum HealthReport {
    /// A sentinel status string.
    Status(String),
    /// The unit answered, and its answer says it is unhealthy.
    Response(UnitResponse),
}

impl HealthReport {
    pub fn status(s: &str) -> Self {
        Self::Status(s.to_string())
    }
}

/// The probe itself could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("health check request failed: {0}")]
    Fetch(String),

    #[error("health check timed out after {0:?}")]
    Timeout(Duration),

    #[error("health check failed: {0}")]
    Other(String),
}

/// Optional probe a supervisor runs against its unit on every wake-up.
pub trait HealthCheck: Send + Sync {
    fn check<'a>(&'a self, unit: &'a dyn UnitRuntime) -> BoxFuture<'a, Result<HealthReport, HealthError>>;
}

/// Probes an HTTP endpoint on the unit.
///
/// A 2xx answer reports `"ok"`, a refused port `"not_listening"`, a unit
/// without a process `"no_container_yet"`. Any other answer is handed back
/// as an unhealthy response.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    pub port: u16,
    pub path: String,
    pub timeout: Duration,
}

impl Default for HttpHealthCheck {
    fn default() -> Self {
        Self {
            port: DEFAULT_UNIT_PORT,
            path: "/_health".to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

impl HttpHealthCheck {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }

    async fn probe(&self, unit: &dyn UnitRuntime) -> Result<HealthReport, HealthError> {
        let request = http::Request::builder()
            .method("GET")
            .uri(self.path.as_str())
            .header("user-agent", "fleetgrid-health/0.1")
            .body(Bytes::new())
            .map_err(|e| HealthError::Other(e.to_string()))?;

        let result = tokio::time::timeout(self.timeout, unit.fetch(self.port, request))
            .await
            .map_err(|_| HealthError::Timeout(self.timeout))?;

        match result {
            Ok(resp) if resp.status().is_success() => Ok(HealthReport::status(OK)),
            Ok(resp) => {
                debug!(status = %resp.status(), path = %self.path, "health probe non-2xx");
                Ok(HealthReport::Response(resp))
            }
            Err(FetchError::NotListening) => Ok(HealthReport::status(NOT_LISTENING)),
            Err(FetchError::NoInstance) => Ok(HealthReport::status(NO_CONTAINER_YET)),
            Err(FetchError::Transport(e)) => {
                debug!(error = %e, path = %self.path, "health probe request failed");
                Err(HealthError::Fetch(e))
            }
        }
    }
}

impl HealthCheck for HttpHealthCheck {
    fn check<'a>(&'a self, unit: &'a dyn UnitRuntime) -> BoxFuture<'a, Result<HealthReport, HealthError>> {
        Box::pin(self.probe(unit))
    }
}
