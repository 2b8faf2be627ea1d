//! Readiness gate
//!
//! Callers await readiness instead of polling the connection. The gate is
//! ready only while the channel is open *and* migrations have completed for
//! the current connection; waiters queue in arrival order and are released
//! together, oldest first, when readiness is granted. Callers admitted
//! through [`ReadinessGate::admit`] take their call id at release, under the
//! gate lock, so ids follow queue order whatever order the woken tasks run in.
//!
//! A driver task follows the connection state: every time the channel
//! opens it runs the migrations once, and grants readiness only if the
//! connection did not change underneath them. A failed migration withholds
//! readiness until the next time the channel opens. Transient drops leave
//! waiters queued; only [`ReadinessGate::teardown`] rejects them.

use super::registry::CallIds;
use crate::migration::MigrationRunner;
use moonlink_core::{ClientEvent, ClientStatus, ConnectionState, EventDispatcher, RpcError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Admission = Result<Option<u64>, RpcError>;

struct ReadyWaiter {
    settle: oneshot::Sender<Admission>,
    wants_id: bool,
    enqueued_at: Instant,
}

#[derive(Default)]
struct GateState {
    ready: bool,
    torn_down: bool,
    status: ClientStatus,
    waiters: VecDeque<ReadyWaiter>,
}

/// Gate that holds callers until the channel is usable
pub struct ReadinessGate {
    state: Mutex<GateState>,
    ids: Arc<CallIds>,
    events: EventDispatcher,
}

impl ReadinessGate {
    /// Create a closed gate handing out ids from `ids`
    pub fn new(ids: Arc<CallIds>, events: EventDispatcher) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            ids,
            events,
        }
    }

    /// Wait until the channel is usable
    ///
    /// Resolves immediately when ready, fails immediately with
    /// [`RpcError::Cancelled`] after teardown, and otherwise queues.
    pub async fn wait_ready(&self) -> Result<(), RpcError> {
        self.enter(false).await.map(|_| ())
    }

    /// Wait until the channel is usable and take a call id
    ///
    /// Queued callers receive ids in the order they queued.
    pub async fn admit(&self) -> Result<u64, RpcError> {
        match self.enter(true).await? {
            Some(id) => Ok(id),
            None => Err(RpcError::Cancelled),
        }
    }

    async fn enter(&self, wants_id: bool) -> Admission {
        let rx = {
            let mut state = self.state.lock();
            if state.torn_down {
                return Err(RpcError::Cancelled);
            }
            if state.ready {
                return Ok(wants_id.then(|| self.ids.next_id()));
            }

            // Forget callers that gave up
            state.waiters.retain(|waiter| !waiter.settle.is_closed());

            let (settle, rx) = oneshot::channel();
            state.waiters.push_back(ReadyWaiter {
                settle,
                wants_id,
                enqueued_at: Instant::now(),
            });
            debug!(waiting = state.waiters.len(), "Caller waiting for readiness");
            rx
        };

        rx.await.unwrap_or(Err(RpcError::Cancelled))
    }

    /// Check if the gate is currently open
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Caller-facing status
    pub fn status(&self) -> ClientStatus {
        self.state.lock().status
    }

    /// Number of queued waiters
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Grant readiness and release all waiters in FIFO order
    ///
    /// Waiters admitted for a call get consecutive ids in queue order.
    /// Returns the number of waiters released. Has no effect after teardown.
    pub fn mark_ready(&self) -> usize {
        let released = {
            let mut state = self.state.lock();
            if state.torn_down {
                return 0;
            }
            state.ready = true;

            let mut released = 0;
            for waiter in state.waiters.drain(..) {
                if waiter.settle.is_closed() {
                    continue;
                }
                let id = waiter.wants_id.then(|| self.ids.next_id());
                debug!(
                    id,
                    waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                    "Releasing waiter"
                );
                if waiter.settle.send(Ok(id)).is_ok() {
                    released += 1;
                }
            }
            released
        };

        self.set_status(ClientStatus::Connected);
        released
    }

    /// Withdraw readiness; queued and future waiters stay pending
    pub fn mark_not_ready(&self) {
        self.state.lock().ready = false;
        self.set_status(ClientStatus::Connecting);
    }

    /// Reject all waiters with [`RpcError::Cancelled`] and close the gate for good
    ///
    /// Returns the number of waiters rejected.
    pub fn teardown(&self) -> usize {
        let drained: Vec<ReadyWaiter> = {
            let mut state = self.state.lock();
            state.torn_down = true;
            state.ready = false;
            state.waiters.drain(..).collect()
        };

        let count = drained.len();
        for waiter in drained {
            let _ = waiter.settle.send(Err(RpcError::Cancelled));
        }
        self.set_status(ClientStatus::Connecting);
        count
    }

    /// Follow `state_rx` and drive readiness, running `migrations` on every open
    pub fn spawn_driver(
        self: &Arc<Self>,
        state_rx: watch::Receiver<ConnectionState>,
        migrations: Arc<dyn MigrationRunner>,
    ) -> JoinHandle<()> {
        tokio::spawn(drive(Arc::clone(self), state_rx, migrations))
    }

    fn set_status(&self, status: ClientStatus) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            info!(status = %status, "Client status changed");
            self.events.emit(ClientEvent::StatusChanged(status));
        }
    }
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReadinessGate")
            .field("ready", &state.ready)
            .field("torn_down", &state.torn_down)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

async fn drive(
    gate: Arc<ReadinessGate>,
    mut state_rx: watch::Receiver<ConnectionState>,
    migrations: Arc<dyn MigrationRunner>,
) {
    loop {
        let connection = *state_rx.borrow_and_update();
        match connection {
            ConnectionState::Open => {
                debug!("Channel open; running migrations");
                match migrations.run_migrations().await {
                    Ok(()) => match state_rx.has_changed() {
                        Ok(false) => {
                            let released = gate.mark_ready();
                            info!(released, "Readiness granted");
                        }
                        // The channel moved on while migrating; re-evaluate
                        Ok(true) => continue,
                        Err(_) => return,
                    },
                    Err(e) => {
                        error!(error = %e, "Migration failed; readiness withheld until next reconnection");
                        gate.events
                            .emit(ClientEvent::MigrationFailed(e.to_string()));
                    }
                }
            }
            ConnectionState::Connecting | ConnectionState::Closed => gate.mark_not_ready(),
        }

        if state_rx.changed().await.is_err() {
            return;
        }
    }
}
