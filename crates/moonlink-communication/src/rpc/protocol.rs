//! JSON-RPC 2.0 envelopes
//!
//! Outbound calls are `{"jsonrpc": "2.0", "method", "params", "id"}`.
//! Inbound frames are either responses (`id` plus `result` or `error`, no
//! `method`) or anything else the backend pushes, such as
//! `notify_status_update` notifications.

use serde::Serialize;
use serde_json::Value;

/// Protocol version stamped on every call
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound call envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallEnvelope {
    /// Always [`JSONRPC_VERSION`]
    pub jsonrpc: &'static str,
    /// Remote method name
    pub method: String,
    /// Call parameters
    pub params: Value,
    /// Correlation id
    pub id: u64,
}

impl CallEnvelope {
    /// Build an envelope for `method`
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
            id,
        }
    }

    /// Encode as a text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame(Value);

impl InboundFrame {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self)
    }

    /// Wrap an already decoded value
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Correlation id if this frame is a response
    ///
    /// Frames carrying a `method` are requests or notifications from the
    /// backend and never settle a call, even if they carry an id.
    pub fn response_id(&self) -> Option<u64> {
        if self.0.get("method").is_some() {
            return None;
        }
        self.0.get("id").and_then(Value::as_u64)
    }

    /// Split a response into its outcome
    ///
    /// A non-null `error` member wins over `result`; a response with
    /// neither yields `null`.
    pub fn into_outcome(self) -> Result<Value, Value> {
        match self.0 {
            Value::Object(mut map) => match map.remove("error") {
                Some(error) if !error.is_null() => Err(error),
                _ => Ok(map.remove("result").unwrap_or(Value::Null)),
            },
            _ => Ok(Value::Null),
        }
    }

    /// The raw frame
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the raw frame
    pub fn into_value(self) -> Value {
        self.0
    }
}
