//! FakeRuntime: scriptable in-memory runtime for tests.
//!
//! Starting flips `running`; monitors stay pending until the test calls
//! [`FakeRuntime::exit`] or [`FakeRuntime::fail_monitors`]. Fetches answer
//! `200 ok` while running and `NoInstance` otherwise, unless scripted.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::StatusCode;
use tokio::sync::oneshot;

use fleetgrid_state::{BoxFuture, StartupOptions};

use crate::error::{FetchError, RuntimeError};
use crate::{UnitRequest, UnitResponse, UnitRuntime};

#[derive(Debug, Clone)]
enum FetchScript {
    Respond(StatusCode, Bytes),
    Fail(FetchError),
}

#[derive(Default)]
struct Inner {
    running: bool,
    starts: u32,
    destroyed: bool,
    last_options: Option<StartupOptions>,
    start_error: Option<RuntimeError>,
    fetch: Option<FetchScript>,
    monitors: Vec<oneshot::Sender<Result<(), RuntimeError>>>,
    requests: Vec<(u16, String)>,
}

/// In-memory stand-in for a unit's process.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<Mutex<Inner>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake runtime lock")
    }

    /// Pretend a process is (or is not) executing, e.g. one that survived a
    /// daemon restart.
    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    /// The process exits: every attached monitor resolves.
    pub fn exit(&self) {
        let mut inner = self.lock();
        inner.running = false;
        for monitor in inner.monitors.drain(..) {
            let _ = monitor.send(Ok(()));
        }
    }

    /// Every attached monitor rejects with an observation failure.
    pub fn fail_monitors(&self, reason: &str) {
        let mut inner = self.lock();
        for monitor in inner.monitors.drain(..) {
            let _ = monitor.send(Err(RuntimeError::Monitor(reason.to_string())));
        }
    }

    /// Make the next start calls fail.
    pub fn fail_start(&self, error: RuntimeError) {
        self.lock().start_error = Some(error);
    }

    /// Answer every fetch with this status and body.
    pub fn respond_with(&self, status: StatusCode, body: &'static str) {
        self.lock().fetch = Some(FetchScript::Respond(status, Bytes::from_static(body.as_bytes())));
    }

    /// Fail every fetch with this error.
    pub fn refuse_with(&self, error: FetchError) {
        self.lock().fetch = Some(FetchScript::Fail(error));
    }

    /// Back to the default fetch behaviour.
    pub fn reset_fetch(&self) {
        self.lock().fetch = None;
    }

    pub fn start_count(&self) -> u32 {
        self.lock().starts
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    pub fn last_options(&self) -> Option<StartupOptions> {
        self.lock().last_options.clone()
    }

    /// Monitors attached and not yet resolved.
    pub fn pending_monitors(&self) -> usize {
        let mut inner = self.lock();
        inner.monitors.retain(|m| !m.is_closed());
        inner.monitors.len()
    }

    /// `(port, uri)` of every request fetched so far.
    pub fn requests(&self) -> Vec<(u16, String)> {
        self.lock().requests.clone()
    }
}

impl UnitRuntime for FakeRuntime {
    fn start<'a>(&'a self, opts: &'a StartupOptions) -> BoxFuture<'a, Result<(), RuntimeError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if let Some(error) = inner.start_error.clone() {
                return Err(error);
            }
            inner.starts += 1;
            inner.running = true;
            inner.last_options = Some(opts.clone());
            Ok(())
        })
    }

    fn running(&self) -> bool {
        self.lock().running
    }

    fn monitor(&self) -> BoxFuture<'static, Result<(), RuntimeError>> {
        let (tx, rx) = oneshot::channel();
        self.lock().monitors.push(tx);
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(RuntimeError::Monitor("fake runtime dropped".to_string())))
        })
    }

    fn destroy(&self) -> BoxFuture<'_, Result<(), RuntimeError>> {
        Box::pin(async move {
            {
                let mut inner = self.lock();
                inner.destroyed = true;
            }
            self.exit();
            Ok(())
        })
    }

    fn fetch(&self, port: u16, request: UnitRequest) -> BoxFuture<'_, Result<UnitResponse, FetchError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.requests.push((port, request.uri().to_string()));
            match inner.fetch.clone() {
                Some(FetchScript::Fail(error)) => Err(error),
                Some(FetchScript::Respond(status, body)) => Ok(response(status, body)),
                None if inner.running => Ok(response(StatusCode::OK, Bytes::from_static(b"ok"))),
                None => Err(FetchError::NoInstance),
            }
        })
    }
}

fn response(status: StatusCode, body: Bytes) -> UnitResponse {
    let mut response = UnitResponse::new(body);
    *response.status_mut() = status;
    response
}
