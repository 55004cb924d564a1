//! ProcessRuntime: runs a unit as a local OS process.
//!
//! The unit's service port is mapped onto a host port handed to the process
//! through the `PORT` environment variable. Process exit is published on a
//! generation-tagged `watch` channel. A monitor follows the latest lifetime:
//! it resolves when that lifetime's process exits, immediately if it already
//! has.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use fleetgrid_state::{BoxFuture, StartupOptions};

use crate::error::{FetchError, RuntimeError};
use crate::{UnitRequest, UnitResponse, UnitRuntime, DEFAULT_UNIT_PORT};

/// Environment variable carrying the host port the unit must listen on.
pub const PORT_ENV: &str = "PORT";

/// Environment variable carrying the opaque internet flag.
pub const INTERNET_ENV: &str = "FLEETGRID_INTERNET_ENABLED";

/// How to launch a unit process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the unit's entrypoint arguments.
    pub args: Vec<String>,
    /// Address the unit's ports are reached on.
    pub host: IpAddr,
    /// Port the unit serves on from the fleet's point of view.
    pub unit_port: u16,
    /// Host port `unit_port` is mapped to.
    pub host_port: u16,
}

impl ProcessConfig {
    pub fn new(program: impl Into<PathBuf>, host_port: u16) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            unit_port: DEFAULT_UNIT_PORT,
            host_port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    /// Exit code (None when killed by a signal), or why waiting failed.
    Exited(Result<Option<i32>, String>),
}

#[derive(Debug, Clone)]
struct Lifetime {
    generation: u64,
    phase: Phase,
}

/// A unit backed by a child process of this daemon.
pub struct ProcessRuntime {
    name: String,
    config: ProcessConfig,
    lifetime: Arc<watch::Sender<Lifetime>>,
    /// Kill switch for the current lifetime's waiter task.
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessRuntime {
    pub fn new(name: &str, config: ProcessConfig) -> Self {
        let (lifetime, _) = watch::channel(Lifetime {
            generation: 0,
            phase: Phase::Idle,
        });
        Self {
            name: name.to_string(),
            config,
            lifetime: Arc::new(lifetime),
            kill: Mutex::new(None),
        }
    }

    fn command(&self, opts: &StartupOptions) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        if let Some(entrypoint) = &opts.entrypoint {
            cmd.args(entrypoint);
        }
        if let Some(env) = &opts.env_vars {
            cmd.envs(env);
        }
        cmd.env(PORT_ENV, self.config.host_port.to_string());
        cmd.env(
            INTERNET_ENV,
            opts.enable_internet.unwrap_or(false).to_string(),
        );
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Host address a unit port is reachable on.
    fn address(&self, port: u16) -> SocketAddr {
        let host_port = if port == self.config.unit_port {
            self.config.host_port
        } else {
            port
        };
        SocketAddr::new(self.config.host, host_port)
    }

    async fn send(&self, port: u16, request: UnitRequest) -> Result<UnitResponse, FetchError> {
        if !self.running() {
            return Err(FetchError::NoInstance);
        }

        let address = self.address(port);
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!(unit = %self.name, %address, "unit port refused connection");
                return Err(FetchError::NotListening);
            }
            Err(e) => return Err(FetchError::Transport(e.to_string())),
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        // Drive the connection in the background.
        let unit = self.name.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(%unit, error = %e, "unit connection closed with error");
            }
        });

        let request = outbound(request, address);
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .to_bytes();
        Ok(UnitResponse::from_parts(parts, body))
    }
}

/// Rewrite a request into origin form with a `host` header for HTTP/1.
fn outbound(request: UnitRequest, address: SocketAddr) -> http::Request<Full<Bytes>> {
    let (mut parts, body) = request.into_parts();
    if !parts.headers.contains_key(http::header::HOST) {
        if let Some(authority) = parts.uri.authority() {
            if let Ok(value) = http::HeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(http::header::HOST, value);
            }
        } else if let Ok(value) = http::HeaderValue::from_str(&address.to_string()) {
            parts.headers.insert(http::header::HOST, value);
        }
    }
    if let Some(path) = parts.uri.path_and_query().cloned() {
        parts.uri = http::Uri::from(path);
    }
    http::Request::from_parts(parts, Full::new(body))
}

impl UnitRuntime for ProcessRuntime {
    fn start<'a>(&'a self, opts: &'a StartupOptions) -> BoxFuture<'a, Result<(), RuntimeError>> {
        Box::pin(async move {
            if self.running() {
                debug!(unit = %self.name, "process already running");
                return Ok(());
            }

            let mut child = self
                .command(opts)
                .spawn()
                .map_err(|e| RuntimeError::Launch(e.to_string()))?;
            let pid = child.id();

            let (kill_tx, kill_rx) = oneshot::channel::<()>();
            *self.kill.lock().expect("kill switch lock") = Some(kill_tx);

            let mut generation = 0;
            self.lifetime.send_modify(|l| {
                l.generation += 1;
                l.phase = Phase::Running;
                generation = l.generation;
            });

            let lifetime = Arc::clone(&self.lifetime);
            let unit = self.name.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill_rx => match child.kill().await {
                        Ok(()) => child.wait().await,
                        Err(e) => Err(e),
                    },
                };

                let phase = match status {
                    Ok(status) => {
                        info!(%unit, generation, code = ?status.code(), "unit process exited");
                        Phase::Exited(Ok(status.code()))
                    }
                    Err(e) => {
                        warn!(%unit, generation, error = %e, "failed to wait for unit process");
                        Phase::Exited(Err(e.to_string()))
                    }
                };
                lifetime.send_modify(|l| {
                    if l.generation == generation {
                        l.phase = phase;
                    }
                });
            });

            info!(unit = %self.name, ?pid, generation, host_port = self.config.host_port, "unit process launched");
            Ok(())
        })
    }

    fn running(&self) -> bool {
        self.lifetime.borrow().phase == Phase::Running
    }

    fn monitor(&self) -> BoxFuture<'static, Result<(), RuntimeError>> {
        let mut rx = self.lifetime.subscribe();
        let current = rx.borrow_and_update().clone();
        // Before the first launch, wait for the first lifetime to end.
        let target = match current.phase {
            Phase::Idle => current.generation + 1,
            _ => current.generation,
        };

        Box::pin(async move {
            let observed = rx
                .wait_for(|l| {
                    l.generation > target
                        || (l.generation == target && matches!(l.phase, Phase::Exited(_)))
                })
                .await
                .map_err(|_| RuntimeError::Monitor("runtime dropped".to_string()))?
                .clone();

            match observed.phase {
                Phase::Exited(Err(reason)) if observed.generation == target => {
                    Err(RuntimeError::Monitor(reason))
                }
                _ => Ok(()),
            }
        })
    }

    fn destroy(&self) -> BoxFuture<'_, Result<(), RuntimeError>> {
        Box::pin(async move {
            let kill = self.kill.lock().expect("kill switch lock").take();
            let Some(kill) = kill else {
                return Ok(());
            };

            let mut rx = self.lifetime.subscribe();
            // The waiter may already have exited and dropped its receiver.
            let _ = kill.send(());
            rx.wait_for(|l| l.phase != Phase::Running)
                .await
                .map_err(|e| RuntimeError::Destroy(e.to_string()))?;
            info!(unit = %self.name, "unit process destroyed");
            Ok(())
        })
    }

    fn fetch(&self, port: u16, request: UnitRequest) -> BoxFuture<'_, Result<UnitResponse, FetchError>> {
        Box::pin(self.send(port, request))
    }
}
