//! In-memory backend used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use moonlink_communication::{
    Channel, ClientConfig, Connector, FrameSink, FrameStream, MigrationRunner, RpcClient,
};
use moonlink_core::{ConnectionError, ConnectionState, MigrationError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub const ENDPOINT: &str = "ws://printer.local/websocket";

struct MockSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.0.send(text).map_err(|_| ConnectionError::SendFailed {
            reason: "peer gone".to_string(),
        })
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

struct MockStream(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameStream for MockStream {
    async fn next_text(&mut self) -> Option<Result<String, ConnectionError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Connector that hands the server side of every channel to a [`MockServer`]
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, MockServer) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (connector, MockServer { peers: rx })
    }

    /// Make subsequent attempts fail during the handshake
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Channel, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::Handshake {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let peer = MockPeer {
            inbound: from_client,
            outbound: to_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| ConnectionError::Handshake {
                endpoint: endpoint.to_string(),
                reason: "server gone".to_string(),
            })?;
        Ok(Channel::new(MockSink(to_server), MockStream(from_server)))
    }
}

/// Accepts the channels opened through a [`MockConnector`]
pub struct MockServer {
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockServer {
    pub async fn accept(&mut self) -> MockPeer {
        self.peers.recv().await.expect("connector dropped")
    }
}

/// Server end of one session; dropping it closes the session
pub struct MockPeer {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl MockPeer {
    /// Next call envelope sent by the client
    pub async fn recv_call(&mut self) -> Value {
        let text = self.inbound.recv().await.expect("client closed the session");
        serde_json::from_str(&text).expect("client sent valid JSON")
    }

    pub fn try_recv_call(&mut self) -> Option<Value> {
        self.inbound
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("client sent valid JSON"))
    }

    pub fn respond(&self, id: u64, result: Value) {
        self.push(json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    pub fn respond_error(&self, id: u64, code: i64, message: &str) {
        self.push(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }));
    }

    pub fn push(&self, frame: Value) {
        let _ = self.outbound.send(frame.to_string());
    }

    pub fn push_text(&self, text: &str) {
        let _ = self.outbound.send(text.to_string());
    }
}

/// Counts runs and fails the first `failures` of them
pub struct CountingMigrations {
    runs: AtomicUsize,
    failures: AtomicUsize,
}

impl CountingMigrations {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            failures: AtomicUsize::new(failures),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MigrationRunner for CountingMigrations {
    async fn run_migrations(&self) -> Result<(), MigrationError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MigrationError::StepFailed {
                name: "create_namespaces".to_string(),
                reason: "database locked".to_string(),
            });
        }
        Ok(())
    }
}

/// Blocks every run until the test hands out a permit
pub struct GatedMigrations {
    permits: Semaphore,
}

impl GatedMigrations {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            permits: Semaphore::new(0),
        })
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }
}

#[async_trait]
impl MigrationRunner for GatedMigrations {
    async fn run_migrations(&self) -> Result<(), MigrationError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| MigrationError::other(e.to_string()))?;
        permit.forget();
        Ok(())
    }
}

/// Poll `condition` until it holds, for at most five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        reconnect_interval: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

/// A client connected to a fresh mock server, ready for calls
pub async fn connected_client(
    config: ClientConfig,
    migrations: Arc<dyn MigrationRunner>,
) -> (RpcClient, Arc<MockConnector>, MockServer, MockPeer) {
    let (connector, mut server) = MockConnector::new();
    let client = RpcClient::new(config, connector.clone(), migrations);
    assert!(client.connect(Some(ENDPOINT)));

    let peer = server.accept().await;
    client.wait_ready().await.expect("client became ready");
    assert_eq!(client.connection_state(), ConnectionState::Open);
    (client, connector, server, peer)
}
