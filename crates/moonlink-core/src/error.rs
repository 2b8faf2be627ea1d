//! Error handling for Moonlink
//!
//! Provides error types for all layers of the client:
//! - Connection errors (transport and endpoint problems)
//! - RPC errors (per-call outcomes: timeout, protocol, cancellation)
//! - Migration errors (post-connect schema setup)
//!
//! All error types use `thiserror`. The per-call types are `Clone` because
//! they are handed to callers through channels.

use serde_json::Value;
use thiserror::Error;

/// Connection error type
///
/// Represents errors raised by the duplex channel underneath the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// There is no open session to send on
    #[error("Not connected")]
    NotConnected,

    /// Endpoint could not be turned into a connection request
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        /// The offending endpoint.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Opening the channel failed
    #[error("Failed to connect to {endpoint}: {reason}")]
    Handshake {
        /// The endpoint that was dialled.
        endpoint: String,
        /// The reason the handshake failed.
        reason: String,
    },

    /// The channel dropped while in use
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// A frame could not be written
    #[error("Send failed: {reason}")]
    SendFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// WebSocket protocol error
    #[error("WebSocket error: {reason}")]
    WebSocketError {
        /// The reason for the WebSocket error.
        reason: String,
    },
}

/// Migration error type
///
/// Returned by migration runners; a failure withholds readiness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    /// A single migration step failed
    #[error("Migration '{name}' failed: {reason}")]
    StepFailed {
        /// The migration step name.
        name: String,
        /// The reason it failed.
        reason: String,
    },

    /// Generic migration error
    #[error("Migration error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

impl MigrationError {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        MigrationError::Other {
            message: msg.into(),
        }
    }
}

/// Outcome of a failed remote-procedure call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// No matching response arrived inside the call window
    #[error("Request {id} ({method}) timed out after {timeout_ms}ms")]
    Timeout {
        /// Correlation id of the call.
        id: u64,
        /// Remote method name.
        method: String,
        /// The window that elapsed.
        timeout_ms: u64,
    },

    /// The response envelope carried an `error` member
    #[error("{method} failed: {}", describe_payload(.payload))]
    Protocol {
        /// Remote method name.
        method: String,
        /// The `error` member exactly as received.
        payload: Value,
    },

    /// The client was torn down while the call or readiness wait was outstanding
    #[error("Client shut down while the request was outstanding")]
    Cancelled,

    /// Params could not be serialised
    #[error("Failed to encode params for {method}: {reason}")]
    Encode {
        /// Remote method name.
        method: String,
        /// Serializer message.
        reason: String,
    },

    /// The result did not match the requested type
    #[error("Failed to decode {method} response: {reason}")]
    Decode {
        /// Remote method name.
        method: String,
        /// Deserializer message.
        reason: String,
    },
}

impl RpcError {
    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled)
    }

    /// Check if the remote end answered with an error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, RpcError::Protocol { .. })
    }

    /// JSON-RPC error code, when the payload carries one
    pub fn protocol_code(&self) -> Option<i64> {
        match self {
            RpcError::Protocol { payload, .. } => payload.get("code").and_then(Value::as_i64),
            _ => None,
        }
    }

    /// JSON-RPC error message, when the payload carries one
    pub fn protocol_message(&self) -> Option<&str> {
        match self {
            RpcError::Protocol { payload, .. } => {
                payload.get("message").and_then(Value::as_str)
            }
            _ => None,
        }
    }
}

fn describe_payload(payload: &Value) -> String {
    match (
        payload.get("code").and_then(Value::as_i64),
        payload.get("message").and_then(Value::as_str),
    ) {
        (Some(code), Some(message)) => format!("{} (code {})", message, code),
        (None, Some(message)) => message.to_string(),
        _ => payload.to_string(),
    }
}

/// Main error type for Moonlink
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// RPC error
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Migration error
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Rpc(e) if e.is_timeout())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Rpc(RpcError::Cancelled))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
