//! Connection manager
//!
//! Owns the single shared channel to the backend. `connect` spawns a
//! background loop that dials the endpoint, pumps frames in both directions
//! while the session lasts, and redials after a fixed interval whenever the
//! session ends, for as long as the manager lives.
//!
//! State transitions are published on a `watch` channel (for the readiness
//! gate) and as [`ClientEvent::StateChanged`] (for observers).

use super::{Channel, Connector};
use moonlink_core::{ClientEvent, ConnectionError, ConnectionState, EventDispatcher};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Grace period for a session to close its socket on shutdown
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Receives every inbound frame, in arrival order
pub trait FrameHandler: Send + Sync {
    /// Called on the connection task for each text frame
    fn on_frame(&self, text: &str);
}

/// Outbound slot of the current session
///
/// `generation` changes whenever a session is replaced or stopped so that a
/// loop which has been superseded can no longer touch state.
#[derive(Default)]
struct SessionSlot {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    slot: Mutex<SessionSlot>,
    events: EventDispatcher,
}

impl Shared {
    fn transition(&self, next: ConnectionState) {
        let mut previous = next;
        let changed = self.state.send_if_modified(|current| {
            previous = *current;
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if !changed {
            return;
        }

        if previous.can_transition_to(next) {
            info!(from = %previous, to = %next, "Connection state changed");
        } else {
            debug!(from = %previous, to = %next, "Connection state forced");
        }
        self.events.emit(ClientEvent::StateChanged(next));
    }

    fn begin_connecting(&self, generation: u64) -> bool {
        let slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        self.transition(ConnectionState::Connecting);
        true
    }

    fn open(&self, generation: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        slot.outbound = Some(outbound);
        self.transition(ConnectionState::Open);
        true
    }

    fn close(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return;
        }
        slot.outbound = None;
        self.transition(ConnectionState::Closed);
    }

    /// Invalidate the running loop, if any, and return the next generation
    fn retire(&self) -> u64 {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        slot.outbound = None;
        self.transition(ConnectionState::Closed);
        slot.generation
    }
}

struct SessionTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owner of the shared duplex channel
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn FrameHandler>,
    reconnect_interval: Duration,
    shared: Arc<Shared>,
    endpoint: Mutex<Option<String>>,
    session: Mutex<Option<SessionTask>>,
}

impl ConnectionManager {
    /// Create a dormant connection manager
    ///
    /// Inbound frames are delivered to `handler`; state changes are emitted
    /// on `events`.
    pub fn new(
        connector: Arc<dyn Connector>,
        handler: Arc<dyn FrameHandler>,
        reconnect_interval: Duration,
        events: EventDispatcher,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            connector,
            handler,
            reconnect_interval,
            shared: Arc::new(Shared {
                state,
                slot: Mutex::new(SessionSlot::default()),
                events,
            }),
            endpoint: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Start connecting to `endpoint`
    ///
    /// A missing or blank endpoint leaves the manager dormant and returns
    /// `false`. Otherwise any running session is replaced and the connection
    /// loop is spawned on the current Tokio runtime; this never blocks.
    pub fn connect(&self, endpoint: Option<&str>) -> bool {
        let endpoint = match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.to_string(),
            None => {
                debug!("No endpoint configured; staying dormant");
                return false;
            }
        };

        self.stop_session();
        let generation = self.shared.slot.lock().generation;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context = LoopContext {
            endpoint: endpoint.clone(),
            connector: Arc::clone(&self.connector),
            handler: Arc::clone(&self.handler),
            shared: Arc::clone(&self.shared),
            generation,
            reconnect_interval: self.reconnect_interval,
        };
        let handle = tokio::spawn(run_connection_loop(context, shutdown_rx));

        info!(endpoint = %endpoint, "Connection manager started");
        *self.endpoint.lock() = Some(endpoint);
        *self.session.lock() = Some(SessionTask {
            shutdown: shutdown_tx,
            handle,
        });
        true
    }

    /// Queue a text frame on the open session
    pub fn send(&self, text: String) -> Result<(), ConnectionError> {
        let slot = self.shared.slot.lock();
        match slot.outbound.as_ref() {
            Some(outbound) => outbound
                .send(text)
                .map_err(|_| ConnectionError::NotConnected),
            None => Err(ConnectionError::NotConnected),
        }
    }

    /// Current channel state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to channel state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Endpoint of the running (or last) session
    pub fn endpoint(&self) -> Option<String> {
        self.endpoint.lock().clone()
    }

    /// Check if a connection loop is running
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| !session.handle.is_finished())
    }

    /// Stop the connection loop, closing the socket gracefully
    pub async fn shutdown(&self) {
        let session = self.session.lock().take();
        if let Some(SessionTask {
            shutdown,
            mut handle,
        }) = session
        {
            let _ = shutdown.send(true);
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                warn!("Connection task did not stop in time; aborting");
                handle.abort();
            }
        }
        self.shared.retire();
    }

    fn stop_session(&self) {
        if let Some(session) = self.session.lock().take() {
            let _ = session.shutdown.send(true);
            session.handle.abort();
        }
        self.shared.retire();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_session();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .field("reconnect_interval", &self.reconnect_interval)
            .finish()
    }
}

struct LoopContext {
    endpoint: String,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn FrameHandler>,
    shared: Arc<Shared>,
    generation: u64,
    reconnect_interval: Duration,
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

async fn run_connection_loop(context: LoopContext, mut shutdown: watch::Receiver<bool>) {
    let LoopContext {
        endpoint,
        connector,
        handler,
        shared,
        generation,
        reconnect_interval,
    } = context;
    let mut attempt: u64 = 0;

    loop {
        if !shared.begin_connecting(generation) {
            return;
        }
        attempt += 1;

        let connected = tokio::select! {
            result = connector.connect(&endpoint) => result,
            _ = shutdown.changed() => return,
        };

        match connected {
            Ok(channel) => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                if !shared.open(generation, outbound_tx) {
                    return;
                }
                debug!(endpoint = %endpoint, attempt, "Session established");
                attempt = 0;

                let end = run_session(channel, outbound_rx, handler.as_ref(), &mut shutdown).await;
                shared.close(generation);

                match end {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Dropped(reason) => warn!(
                        endpoint = %endpoint,
                        reason = %reason,
                        "Connection dropped; reconnecting in {}ms",
                        reconnect_interval.as_millis()
                    ),
                }
            }
            Err(e) => warn!(
                endpoint = %endpoint,
                attempt,
                error = %e,
                "Connection attempt failed; retrying in {}ms",
                reconnect_interval.as_millis()
            ),
        }

        tokio::select! {
            _ = tokio::time::sleep(reconnect_interval) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn run_session(
    channel: Channel,
    mut outbound: mpsc::UnboundedReceiver<String>,
    handler: &dyn FrameHandler,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let Channel {
        mut sink,
        mut stream,
    } = channel;

    let end = loop {
        tokio::select! {
            frame = stream.next_text() => match frame {
                Some(Ok(text)) => {
                    trace!(frame = %text, "Received frame");
                    handler.on_frame(&text);
                }
                Some(Err(e)) => break SessionEnd::Dropped(e.to_string()),
                None => break SessionEnd::Dropped("closed by peer".to_string()),
            },
            Some(text) = outbound.recv() => {
                trace!(frame = %text, "Sending frame");
                if let Err(e) = sink.send_text(text).await {
                    break SessionEnd::Dropped(e.to_string());
                }
            }
            _ = shutdown.changed() => break SessionEnd::Shutdown,
        }
    };

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Error while closing channel");
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::{FrameSink, FrameStream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, endpoint: &str) -> Result<Channel, ConnectionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ConnectionError::Handshake {
                endpoint: endpoint.to_string(),
                reason: "refused".to_string(),
            })
        }
    }

    struct NullHandler;

    impl FrameHandler for NullHandler {
        fn on_frame(&self, _text: &str) {}
    }

    struct EchoSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl FrameSink for EchoSink {
        async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
            self.0.send(text).map_err(|_| ConnectionError::NotConnected)
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            Ok(())
        }
    }

    struct EchoStream(mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl FrameStream for EchoStream {
        async fn next_text(&mut self) -> Option<Result<String, ConnectionError>> {
            self.0.recv().await.map(Ok)
        }
    }

    struct EchoConnector;

    #[async_trait]
    impl Connector for EchoConnector {
        async fn connect(&self, _endpoint: &str) -> Result<Channel, ConnectionError> {
            let (tx, rx) = mpsc::unbounded_channel();
            Ok(Channel::new(EchoSink(tx), EchoStream(rx)))
        }
    }

    struct RecordingHandler(Mutex<Vec<String>>);

    impl FrameHandler for RecordingHandler {
        fn on_frame(&self, text: &str) {
            self.0.lock().push(text.to_string());
        }
    }

    fn manager(connector: Arc<dyn Connector>, handler: Arc<dyn FrameHandler>) -> ConnectionManager {
        ConnectionManager::new(
            connector,
            handler,
            Duration::from_secs(3),
            EventDispatcher::default(),
        )
    }

    #[tokio::test]
    async fn test_blank_endpoint_stays_dormant() {
        let connector = Arc::new(CountingConnector {
            attempts: AtomicUsize::new(0),
        });
        let manager = manager(connector.clone(), Arc::new(NullHandler));

        assert!(!manager.connect(None));
        assert!(!manager.connect(Some("   ")));
        tokio::task::yield_now().await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.is_running());
        assert_eq!(
            manager.send("{}".to_string()),
            Err(ConnectionError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_retry_at_fixed_interval() {
        let connector = Arc::new(CountingConnector {
            attempts: AtomicUsize::new(0),
        });
        let manager = manager(connector.clone(), Arc::new(NullHandler));

        assert!(manager.connect(Some("ws://printer.local/websocket")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_frames_flow_through_open_session() {
        let handler = Arc::new(RecordingHandler(Mutex::new(Vec::new())));
        let manager = manager(Arc::new(EchoConnector), handler.clone());
        let mut state = manager.watch_state();

        manager.connect(Some("ws://printer.local/websocket"));
        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .expect("state channel open");

        manager.send("ping".to_string()).unwrap();
        manager.send("pong".to_string()).unwrap();
        while handler.0.lock().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*handler.0.lock(), vec!["ping".to_string(), "pong".to_string()]);

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(
            manager.send("late".to_string()),
            Err(ConnectionError::NotConnected)
        );
    }
}
