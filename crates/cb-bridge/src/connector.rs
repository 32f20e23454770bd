//! Reverse connection to the orchestrator
//!
//! The bridge has no inbound discovery: it announces itself to the
//! orchestrator's registry, receives a server id, and keeps that
//! registration alive with periodic heartbeats until it is stopped.
//!
//! # Lifecycle
//!
//! ```text
//! Disabled                      (enabled = false, start/stop are no-ops)
//! Disconnected -> Registering -> Connected -> Stopped
//!                      |
//!                      +-> Disconnected   (registration failed)
//! ```
//!
//! A failed registration is not retried; the bridge keeps serving local
//! calls and the orchestrator can be re-joined by calling `start` again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use cb_core::ReverseConnectionConfig;
use cb_protocol::{
    DispatchResult, HeartbeatRequest, Params, RegisterRequest, RegisterResponse, ServerId,
    CONNECT_PATH, HEARTBEAT_PATH,
};

use crate::dispatcher::MethodDispatcher;
use crate::error::RegistryError;

/// Connection state as seen by the rest of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    /// Reverse connection turned off by configuration
    Disabled,
    /// Not registered (initial state, or registration failed)
    Disconnected,
    /// Registration call in flight
    Registering,
    /// Registered, heartbeat running
    Connected,
    /// Shut down by `stop`
    Stopped,
}

/// Registration outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Identifier assigned by the orchestrator
    pub server_id: Option<String>,
    /// True only while a registration is live
    pub connected: bool,
}

/// Snapshot published to observers such as the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorStatus {
    pub state: ConnectorState,
    pub server_id: Option<String>,
}

/// Heartbeat counters shared with the background task
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl HeartbeatStats {
    /// Heartbeats acknowledged with 200
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Heartbeats that failed in transport or got a non-200 answer
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Background heartbeat task and its stop signal
struct HeartbeatTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatTask {
    fn spawn(
        client: Client,
        config: ReverseConnectionConfig,
        server_id: ServerId,
        stats: Arc<HeartbeatStats>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            client,
            config,
            server_id,
            stats,
            cancel.clone(),
        ));
        Self { cancel, handle }
    }

    /// Signal the task and wait until it has exited
    async fn shutdown(self) {
        self.cancel.cancel();
        match self.handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::warn!("Heartbeat task ended abnormally: {}", e),
        }
    }
}

/// Owns the orchestrator session: registration, heartbeat and dispatch
pub struct SessionConnector {
    config: ReverseConnectionConfig,
    dispatcher: Arc<MethodDispatcher>,
    state: ConnectorState,
    session: Session,
    /// Transport session; present from `start` until `stop`
    client: Option<Client>,
    heartbeat: Option<HeartbeatTask>,
    stats: Arc<HeartbeatStats>,
    status_tx: watch::Sender<ConnectorStatus>,
}

impl SessionConnector {
    pub fn new(config: ReverseConnectionConfig, dispatcher: Arc<MethodDispatcher>) -> Self {
        let state = if config.enabled {
            ConnectorState::Disconnected
        } else {
            ConnectorState::Disabled
        };
        let (status_tx, _) = watch::channel(ConnectorStatus {
            state,
            server_id: None,
        });

        Self {
            config,
            dispatcher,
            state,
            session: Session::default(),
            client: None,
            heartbeat: None,
            stats: Arc::new(HeartbeatStats::default()),
            status_tx,
        }
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn server_id(&self) -> Option<&str> {
        self.session.server_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected
    }

    /// Whether a transport session is currently held
    pub fn has_transport(&self) -> bool {
        self.client.is_some()
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn heartbeat_stats(&self) -> Arc<HeartbeatStats> {
        Arc::clone(&self.stats)
    }

    /// Observe state changes without holding the connector
    pub fn subscribe(&self) -> watch::Receiver<ConnectorStatus> {
        self.status_tx.subscribe()
    }

    /// Register with the orchestrator and start the heartbeat
    ///
    /// Never fails: a rejected or unreachable registry leaves the connector
    /// `Disconnected` with the error logged.
    pub async fn start(&mut self) {
        if !self.config.enabled {
            tracing::info!("Reverse connection disabled, not registering with orchestrator");
            return;
        }
        if self.state == ConnectorState::Connected {
            tracing::warn!(
                "Already registered as {}, ignoring start",
                self.server_id().unwrap_or_default()
            );
            return;
        }

        tracing::info!(
            "Starting reverse connection to orchestrator at {}",
            self.config.orchestrator_url
        );

        let client = match self.client.take() {
            Some(client) => client,
            None => match Client::builder().timeout(self.config.request_timeout).build() {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!("Failed to create HTTP client: {}", e);
                    self.set_state(ConnectorState::Disconnected);
                    return;
                }
            },
        };

        self.set_state(ConnectorState::Registering);
        let result = register(&client, &self.config).await;
        self.client = Some(client.clone());

        match result {
            Ok(server_id) => {
                tracing::info!("Registered with orchestrator as {}", server_id);
                self.session = Session {
                    server_id: Some(server_id.to_string()),
                    connected: true,
                };
                self.heartbeat = Some(HeartbeatTask::spawn(
                    client,
                    self.config.clone(),
                    server_id,
                    Arc::clone(&self.stats),
                ));
                self.set_state(ConnectorState::Connected);
            }
            Err(e) => {
                tracing::error!("Failed to register with orchestrator: {}", e);
                self.session = Session::default();
                self.set_state(ConnectorState::Disconnected);
            }
        }
    }

    /// Stop the heartbeat, release the transport and clear the session
    ///
    /// Idempotent and safe in any state. When this returns the heartbeat
    /// task has exited.
    pub async fn stop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.shutdown().await;
            tracing::debug!("Heartbeat task stopped");
        }
        if self.client.take().is_some() {
            tracing::debug!("Released orchestrator transport");
        }
        self.session = Session::default();

        if self.state != ConnectorState::Disabled && self.state != ConnectorState::Stopped {
            self.set_state(ConnectorState::Stopped);
            tracing::info!("Reverse connection stopped");
        }
    }

    /// Route an orchestrator call through the method table
    pub async fn dispatch(&self, method: &str, params: Params) -> DispatchResult {
        self.dispatcher.dispatch(method, params).await
    }

    fn set_state(&mut self, state: ConnectorState) {
        self.state = state;
        self.status_tx.send_replace(ConnectorStatus {
            state,
            server_id: self.session.server_id.clone(),
        });
    }
}

fn authorized(request: RequestBuilder, config: &ReverseConnectionConfig) -> RequestBuilder {
    match config.bearer_token() {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn register(
    client: &Client,
    config: &ReverseConnectionConfig,
) -> Result<ServerId, RegistryError> {
    let payload = RegisterRequest::new(config.server_name.clone(), env!("CARGO_PKG_VERSION"));
    let response = authorized(client.post(config.endpoint(CONNECT_PATH)), config)
        .json(&payload)
        .send()
        .await?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(RegistryError::UnexpectedStatus { status, body });
    }

    let body: RegisterResponse = response.json().await?;
    body.server_id().ok_or(RegistryError::MissingServerId)
}

async fn send_heartbeat(
    client: &Client,
    url: &str,
    config: &ReverseConnectionConfig,
    body: &HeartbeatRequest,
) -> Result<(), RegistryError> {
    let response = authorized(client.post(url), config).json(body).send().await?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(RegistryError::UnexpectedStatus { status, body });
    }
    Ok(())
}

/// Heartbeat loop; first beat one interval after registration
async fn run_heartbeat(
    client: Client,
    config: ReverseConnectionConfig,
    server_id: ServerId,
    stats: Arc<HeartbeatStats>,
    cancel: CancellationToken,
) {
    let period = config.heartbeat_interval;
    let url = config.endpoint(HEARTBEAT_PATH);
    let body = HeartbeatRequest { server_id };

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!("Heartbeat every {:?} to {}", period, url);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = send_heartbeat(&client, &url, &config, &body) => match result {
                Ok(()) => {
                    stats.record_sent();
                    tracing::trace!("Heartbeat acknowledged");
                }
                Err(e) => {
                    stats.record_failure();
                    tracing::warn!("Heartbeat failed: {}", e);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::RecordingHandlers;
    use std::time::Duration;

    fn connector(enabled: bool) -> SessionConnector {
        let config = ReverseConnectionConfig {
            enabled,
            // Nothing listens on the discard port
            orchestrator_url: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let dispatcher = MethodDispatcher::new(Arc::new(RecordingHandlers::default()));
        SessionConnector::new(config, Arc::new(dispatcher))
    }

    #[test]
    fn test_initial_state() {
        let enabled = connector(true);
        assert_eq!(enabled.state(), ConnectorState::Disconnected);
        assert!(!enabled.has_transport());
        assert!(!enabled.heartbeat_running());
        assert_eq!(enabled.server_id(), None);

        assert_eq!(connector(false).state(), ConnectorState::Disabled);
    }

    #[tokio::test]
    async fn test_disabled_start_is_noop() {
        let mut c = connector(false);
        let status = c.subscribe();

        c.start().await;
        assert_eq!(c.state(), ConnectorState::Disabled);
        assert!(!c.has_transport());
        assert!(!c.heartbeat_running());

        c.stop().await;
        assert_eq!(c.state(), ConnectorState::Disabled);
        assert_eq!(status.borrow().state, ConnectorState::Disabled);
    }

    #[tokio::test]
    async fn test_unreachable_orchestrator() {
        let mut c = connector(true);
        c.start().await;

        assert_eq!(c.state(), ConnectorState::Disconnected);
        assert_eq!(c.session(), &Session::default());
        assert!(c.has_transport());
        assert!(!c.heartbeat_running());

        c.stop().await;
        assert_eq!(c.state(), ConnectorState::Stopped);
        assert!(!c.has_transport());
    }

    #[tokio::test]
    async fn test_stop_without_start_and_twice() {
        let mut c = connector(true);
        c.stop().await;
        c.stop().await;
        assert_eq!(c.state(), ConnectorState::Stopped);
        assert_eq!(c.server_id(), None);
    }

    #[tokio::test]
    async fn test_dispatch_delegates() {
        let c = connector(false);
        let result = c.dispatch("close_crash_session", Params::new()).await;
        assert_eq!(result, DispatchResult::success("close_crash_session called"));
    }

    #[test]
    fn test_heartbeat_stats() {
        let stats = HeartbeatStats::default();
        stats.record_sent();
        stats.record_sent();
        stats.record_failure();
        assert_eq!(stats.sent(), 2);
        assert_eq!(stats.failed(), 1);
    }
}
