//! Event system for client observers
//!
//! Provides:
//! - Event types for connection, status and unsolicited message updates
//! - Event dispatcher for publishing events to subscribers

use crate::state::{ClientStatus, ConnectionState};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

/// An inbound message that did not settle any outstanding call
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// The decoded frame
    pub payload: Value,
    /// When the frame was received
    pub received_at: DateTime<Utc>,
}

impl ReceivedMessage {
    /// Wrap a payload stamped with the current time
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }

    /// Notification method name, for push notifications
    pub fn method(&self) -> Option<&str> {
        self.payload.get("method").and_then(Value::as_str)
    }

    /// Correlation id, for late or unmatched responses
    pub fn id(&self) -> Option<u64> {
        self.payload.get("id").and_then(Value::as_u64)
    }
}

/// Client event types
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Channel state changed
    StateChanged(ConnectionState),
    /// Caller-facing status changed
    StatusChanged(ClientStatus),
    /// Unsolicited message received
    Message(ReceivedMessage),
    /// Post-connect migration failed; readiness withheld
    MigrationFailed(String),
}

impl std::fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientEvent::StateChanged(state) => write!(f, "Connection {}", state),
            ClientEvent::StatusChanged(status) => write!(f, "Status: {}", status),
            ClientEvent::Message(message) => match message.method() {
                Some(method) => write!(f, "Notification: {}", method),
                None => write!(f, "Message: {}", message.payload),
            },
            ClientEvent::MigrationFailed(reason) => write!(f, "Migration failed: {}", reason),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for client events.
    tx: broadcast::Sender<ClientEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Create a new event dispatcher with default buffer size
    pub fn default_with_buffer() -> Self {
        Self::new(100)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(
        &self,
        event: ClientEvent,
    ) -> Result<usize, broadcast::error::SendError<ClientEvent>> {
        self.tx.send(event)
    }

    /// Publish an event, ignoring the absence of subscribers
    pub fn emit(&self, event: ClientEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            tracing::trace!("No subscribers for event: {}", event);
        }
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::default_with_buffer()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
