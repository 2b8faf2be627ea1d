//! Call registry
//!
//! Allocates correlation ids, keeps one pending entry per outstanding call
//! and settles each entry exactly once: by its response, by its timeout
//! timer, or by teardown, whichever removes it from the table first.
//! Frames that match no entry are kept as the last observed message and
//! broadcast to observers.

use super::protocol::InboundFrame;
use crate::communication::connection::FrameHandler;
use moonlink_core::{ClientEvent, EventDispatcher, ReceivedMessage, RpcError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Settlement = Result<Value, RpcError>;

struct PendingCall {
    method: String,
    settle: oneshot::Sender<Settlement>,
    timer: JoinHandle<()>,
    created_at: Instant,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    closed: bool,
}

/// Counters describing how calls were settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Calls registered
    pub issued: u64,
    /// Calls settled by a matching response
    pub resolved: u64,
    /// Calls settled by their timer
    pub timed_out: u64,
    /// Calls settled by teardown
    pub cancelled: u64,
    /// Calls still outstanding
    pub pending: usize,
}

/// Receiver side of one registered call
#[derive(Debug)]
pub struct PendingCallHandle {
    id: u64,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingCallHandle {
    /// Correlation id assigned to the call
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the registry to settle the call
    pub async fn wait(self) -> Result<Value, RpcError> {
        self.rx.await.unwrap_or(Err(RpcError::Cancelled))
    }
}

/// Source of call correlation ids
///
/// Shared by the registry and the readiness gate so that callers released
/// from the gate receive ids in the order they queued.
#[derive(Debug)]
pub struct CallIds {
    next: AtomicU64,
}

impl CallIds {
    /// Start numbering at 1
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next id
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for CallIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending-call table with per-call timeouts
pub struct CallRegistry {
    ids: Arc<CallIds>,
    pending: Mutex<PendingTable>,
    timeout: Duration,
    last_message: RwLock<Option<ReceivedMessage>>,
    events: EventDispatcher,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

impl CallRegistry {
    /// Create a registry whose calls expire after `timeout`
    pub fn new(timeout: Duration, events: EventDispatcher) -> Self {
        Self {
            ids: Arc::new(CallIds::new()),
            pending: Mutex::new(PendingTable::default()),
            timeout,
            last_message: RwLock::new(None),
            events,
            resolved: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Id source shared with the readiness gate
    pub fn ids(&self) -> Arc<CallIds> {
        Arc::clone(&self.ids)
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a call to `method` under a fresh id and start its timer
    ///
    /// Ids are strictly increasing across all callers and never reused.
    /// After [`cancel_all`](Self::cancel_all) the returned handle is already
    /// settled with [`RpcError::Cancelled`].
    pub fn register(self: &Arc<Self>, method: &str) -> PendingCallHandle {
        let id = self.ids.next_id();
        self.register_with_id(id, method)
    }

    /// Register a call under an id already taken from [`ids`](Self::ids)
    pub fn register_with_id(self: &Arc<Self>, id: u64, method: &str) -> PendingCallHandle {
        let (settle, rx) = oneshot::channel();

        let mut table = self.pending.lock();
        if table.closed {
            let _ = settle.send(Err(RpcError::Cancelled));
            return PendingCallHandle { id, rx };
        }

        // Spawned under the table lock so expiry cannot run before insertion
        let timer = tokio::spawn(expire_after(Arc::downgrade(self), id, self.timeout));
        let previous = table.calls.insert(
            id,
            PendingCall {
                method: method.to_string(),
                settle,
                timer,
                created_at: Instant::now(),
            },
        );
        debug_assert!(previous.is_none(), "call id {} registered twice", id);

        debug!(id, method, "Call registered");
        PendingCallHandle { id, rx }
    }

    /// Drop a registered call without settling it through the wire
    pub fn abandon(&self, id: u64, error: RpcError) {
        if let Some(call) = self.take(id) {
            call.timer.abort();
            let _ = call.settle.send(Err(error));
        }
    }

    /// Route one inbound frame
    pub fn handle_frame(&self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Discarding malformed frame");
                return;
            }
        };

        if let Some(id) = frame.response_id() {
            if let Some(call) = self.take(id) {
                call.timer.abort();
                debug!(
                    id,
                    method = %call.method,
                    elapsed_ms = call.created_at.elapsed().as_millis() as u64,
                    "Call settled by response"
                );
                let method = call.method;
                let outcome = frame
                    .into_outcome()
                    .map_err(|payload| RpcError::Protocol { method, payload });
                self.resolved.fetch_add(1, Ordering::Relaxed);
                let _ = call.settle.send(outcome);
                return;
            }
            debug!(id, "Response matched no pending call");
        }

        let message = ReceivedMessage::new(frame.into_value());
        *self.last_message.write() = Some(message.clone());
        self.events.emit(ClientEvent::Message(message));
    }

    /// Settle every outstanding call with [`RpcError::Cancelled`]
    ///
    /// Aborts all timers and refuses later registrations. Returns the
    /// number of calls cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(u64, PendingCall)> = {
            let mut table = self.pending.lock();
            table.closed = true;
            table.calls.drain().collect()
        };

        let count = drained.len();
        for (id, call) in drained {
            call.timer.abort();
            debug!(id, method = %call.method, "Call cancelled");
            let _ = call.settle.send(Err(RpcError::Cancelled));
        }
        self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Number of outstanding calls
    pub fn pending_count(&self) -> usize {
        self.pending.lock().calls.len()
    }

    /// Latest frame that did not settle a call
    pub fn last_message(&self) -> Option<ReceivedMessage> {
        self.last_message.read().clone()
    }

    /// Settlement counters
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            issued: self.ids.issued(),
            resolved: self.resolved.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            pending: self.pending_count(),
        }
    }

    fn take(&self, id: u64) -> Option<PendingCall> {
        self.pending.lock().calls.remove(&id)
    }

    fn expire(&self, id: u64) {
        if let Some(call) = self.take(id) {
            warn!(id, method = %call.method, "Call timed out");
            self.timed_out.fetch_add(1, Ordering::Relaxed);
            let _ = call.settle.send(Err(RpcError::Timeout {
                id,
                method: call.method,
                timeout_ms: self.timeout.as_millis() as u64,
            }));
        }
    }
}

impl FrameHandler for CallRegistry {
    fn on_frame(&self, text: &str) {
        self.handle_frame(text);
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry")
            .field("timeout", &self.timeout)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn expire_after(registry: Weak<CallRegistry>, id: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(registry) = registry.upgrade() {
        registry.expire(id);
    }
}
