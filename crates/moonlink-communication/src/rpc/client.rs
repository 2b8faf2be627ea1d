//! RPC client facade
//!
//! [`RpcClient`] is a cheap, cloneable handle to one connection manager,
//! readiness gate and call registry. Every clone shares the same channel,
//! id counter and pending table; dropping the last clone tears the client
//! down.

use super::gate::ReadinessGate;
use super::protocol::CallEnvelope;
use super::registry::{CallRegistry, RegistryStats};
use crate::communication::{
    connection::{ConnectionManager, FrameHandler},
    websocket::WebSocketConnector,
    Connector,
};
use crate::migration::MigrationRunner;
use crate::store::NamespacedStore;
use moonlink_core::{
    ClientEvent, ClientStatus, ConnectionState, EventDispatcher, ReceivedMessage, RpcError,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default per-call timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay between reconnection attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Configuration for an [`RpcClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time a call may wait for its response
    pub call_timeout: Duration,
    /// Delay before redialling after a drop or failed attempt
    pub reconnect_interval: Duration,
    /// Capacity of the event broadcast buffer
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            event_capacity: 100,
        }
    }
}

struct ClientInner {
    config: ClientConfig,
    manager: ConnectionManager,
    gate: Arc<ReadinessGate>,
    registry: Arc<CallRegistry>,
    events: EventDispatcher,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn teardown(&self) -> (usize, usize) {
        let waiters = self.gate.teardown();
        let calls = self.registry.cancel_all();
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        (waiters, calls)
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// JSON-RPC client over the shared control channel
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Create a dormant client
    ///
    /// Must be called from within a Tokio runtime: the readiness driver is
    /// spawned immediately. Nothing is dialled until [`connect`](Self::connect).
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        migrations: Arc<dyn MigrationRunner>,
    ) -> Self {
        let events = EventDispatcher::new(config.event_capacity);
        let registry = Arc::new(CallRegistry::new(config.call_timeout, events.clone()));
        let handler: Arc<dyn FrameHandler> = registry.clone();
        let manager = ConnectionManager::new(
            connector,
            handler,
            config.reconnect_interval,
            events.clone(),
        );
        let gate = Arc::new(ReadinessGate::new(registry.ids(), events.clone()));
        let driver = gate.spawn_driver(manager.watch_state(), migrations);

        Self {
            inner: Arc::new(ClientInner {
                config,
                manager,
                gate,
                registry,
                events,
                driver: Mutex::new(Some(driver)),
            }),
        }
    }

    /// Create a dormant client that dials over WebSocket
    pub fn with_websocket(config: ClientConfig, migrations: Arc<dyn MigrationRunner>) -> Self {
        Self::new(config, Arc::new(WebSocketConnector::new()), migrations)
    }

    /// Start connecting to `endpoint`
    ///
    /// Returns `false` and stays dormant when the endpoint is missing or blank.
    pub fn connect(&self, endpoint: Option<&str>) -> bool {
        self.inner.manager.connect(endpoint)
    }

    /// Call `method` with raw JSON params
    ///
    /// Waits for readiness, registers the call, sends it and waits for the
    /// matching response or the call timeout. Never retries. Callers queued
    /// for readiness receive ids in the order they called.
    pub async fn call_value(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.inner.gate.admit().await?;
        let pending = self.inner.registry.register_with_id(id, method);

        let text = match CallEnvelope::new(id, method, params).to_text() {
            Ok(text) => text,
            Err(e) => {
                let error = RpcError::Encode {
                    method: method.to_string(),
                    reason: e.to_string(),
                };
                self.inner.registry.abandon(id, error);
                return pending.wait().await;
            }
        };

        debug!(id, method, "Sending call");
        if let Err(e) = self.inner.manager.send(text) {
            // Surfaces to the caller as a timeout
            warn!(id, method, error = %e, "Call could not be written");
        }

        pending.wait().await
    }

    /// Call `method` with typed params and result
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| RpcError::Encode {
            method: method.to_string(),
            reason: e.to_string(),
        })?;
        let result = self.call_value(method, params).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Wait until the channel is open and migrations have completed
    pub async fn wait_ready(&self) -> Result<(), RpcError> {
        self.inner.gate.wait_ready().await
    }

    /// Check if calls currently go straight through
    pub fn is_ready(&self) -> bool {
        self.inner.gate.is_ready()
    }

    /// Caller-facing status
    pub fn status(&self) -> ClientStatus {
        self.inner.gate.status()
    }

    /// Current channel state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Subscribe to channel state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.manager.watch_state()
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Latest inbound frame that did not settle a call
    pub fn last_message(&self) -> Option<ReceivedMessage> {
        self.inner.registry.last_message()
    }

    /// Endpoint of the current session
    pub fn endpoint(&self) -> Option<String> {
        self.inner.manager.endpoint()
    }

    /// Number of calls awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.inner.registry.pending_count()
    }

    /// Number of callers waiting for readiness
    pub fn waiting_callers(&self) -> usize {
        self.inner.gate.waiting()
    }

    /// Settlement counters
    pub fn stats(&self) -> RegistryStats {
        self.inner.registry.stats()
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Namespaced database store on this client
    pub fn store(&self) -> NamespacedStore {
        NamespacedStore::new(self.clone())
    }

    /// Tear the client down
    ///
    /// Rejects every readiness waiter and pending call with
    /// [`RpcError::Cancelled`], cancels their timers and closes the channel.
    /// Later calls fail immediately.
    pub async fn shutdown(&self) {
        let (waiters, calls) = self.inner.teardown();
        self.inner.manager.shutdown().await;
        info!(waiters, calls, "Client shut down");
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("manager", &self.inner.manager)
            .field("gate", &self.inner.gate)
            .field("registry", &self.inner.registry)
            .finish()
    }
}
