//! Window RTC integration test harness
//!
//! Builds a hub bound to an in-process loopback host and opens windows on
//! it. Each window gets its own scripted engine factory so tests can reach
//! the engine behind every session they open.
//!
//! Basic usage pattern:
//!
//! 1. Create a `TestHub`
//! 2. Open windows with `hub.open("A")`
//! 3. Open sessions with `window.session_with("B")`
//! 4. Drive events and assert with `wait_for` / `collect_for`

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;
use window_rtc::engine::scripted::{ScriptedEngine, ScriptedEngineFactory};
use window_rtc::transport::loopback::{LoopbackEndpoint, LoopbackHost, LoopbackTransport};
use window_rtc::{
    Endpoint, EventKind, HubClient, PeerSession, SessionEventData, WindowHub, WindowRtcConfig,
};

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Window error: {0}")]
    WindowError(#[from] window_rtc::Error),

    #[error("Engine error: {0}")]
    EngineError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Stream closed: {0}")]
    StreamClosed(String),
}

/// Default wait for an expected event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to listen when asserting that something does NOT happen
pub const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,window_rtc=debug")
        .with_test_writer()
        .try_init();
}

/// Hub bound to a loopback host
pub struct TestHub {
    pub host: LoopbackHost,
    pub hub: WindowHub,
}

impl TestHub {
    pub fn new() -> Self {
        let host = LoopbackHost::new();
        let hub = WindowHub::new();
        hub.bind(Arc::new(host.clone()));
        Self { host, hub }
    }

    /// Open a window and register it under `name`
    pub fn open(&self, name: &str) -> HarnessResult<TestWindow> {
        let window = self.open_unregistered();
        self.hub.register(name, window.handle.clone())?;
        Ok(window)
    }

    /// Open a window the registry does not know about
    pub fn open_unregistered(&self) -> TestWindow {
        let (handle, transport) = self.host.open_window();
        let engines = ScriptedEngineFactory::new();
        let endpoint = Endpoint::new(engines.clone(), WindowRtcConfig::default());
        endpoint.define_transport(transport.clone());
        debug!("Harness opened window {}", transport.endpoint_id());
        TestWindow {
            handle,
            transport,
            endpoint,
            engines,
        }
    }
}

impl Default for TestHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One window: hub-side handle, window-side transport and endpoint
pub struct TestWindow {
    pub handle: Arc<LoopbackEndpoint>,
    pub transport: Arc<LoopbackTransport>,
    pub endpoint: Endpoint,
    pub engines: Arc<ScriptedEngineFactory>,
}

impl TestWindow {
    pub fn client(&self) -> HubClient {
        HubClient::new(self.transport.clone(), Duration::from_secs(1))
    }

    /// Open a session with `peer` and return it with the engine behind it
    pub async fn session_with(
        &self,
        peer: &str,
    ) -> HarnessResult<(PeerSession, Arc<ScriptedEngine>)> {
        let session = PeerSession::with(&self.endpoint, peer).await?;
        let engine = self
            .engines
            .last()
            .ok_or_else(|| HarnessError::EngineError("no engine was created".to_string()))?;
        Ok((session, engine))
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

/// Wait for the next event of `kind`, skipping others
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<SessionEventData>,
    kind: EventKind,
    timeout: Duration,
) -> HarnessResult<SessionEventData> {
    tokio::time::timeout(timeout, async {
        while let Some(data) = events.recv().await {
            if data.kind() == kind {
                return Ok(data);
            }
        }
        Err(HarnessError::StreamClosed(format!(
            "event stream ended before {}",
            kind
        )))
    })
    .await
    .map_err(|_| HarnessError::Timeout(format!("no {} within {:?}", kind, timeout)))?
}

/// Collect every event that arrives within `period`
pub async fn collect_for(
    events: &mut mpsc::UnboundedReceiver<SessionEventData>,
    period: Duration,
) -> Vec<SessionEventData> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + period;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(data)) => seen.push(data),
            Ok(None) | Err(_) => return seen,
        }
    }
}

/// Count events of `kind` in `events`
pub fn count(events: &[SessionEventData], kind: EventKind) -> usize {
    events.iter().filter(|data| data.kind() == kind).count()
}

/// Collect raw pushes on a channel subscription within `period`
pub async fn drain_pushes(
    rx: &mut mpsc::UnboundedReceiver<serde_json::Value>,
    period: Duration,
) -> Vec<serde_json::Value> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + period;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(value)) => seen.push(value),
            Ok(None) | Err(_) => return seen,
        }
    }
}
