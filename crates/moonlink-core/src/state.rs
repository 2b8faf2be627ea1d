//! Connection and client status models
//!
//! `ConnectionState` tracks the raw channel; `ClientStatus` is what callers
//! see and only reports `Connected` once post-connect setup has finished.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the duplex channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A connection attempt is in progress
    Connecting,
    /// The channel is open and usable
    Open,
    /// No channel; either dormant or between reconnection attempts
    #[default]
    Closed,
}

impl ConnectionState {
    /// Check if the channel is open
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check whether `next` is a regular transition from this state
    ///
    /// Teardown may force any state to `Closed`; that path does not go
    /// through this check.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Open, ConnectionState::Closed)
                | (ConnectionState::Closed, ConnectionState::Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Caller-facing client status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// Waiting for the channel or for migrations
    #[default]
    Connecting,
    /// Channel open and migrations complete
    Connected,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientStatus::Connecting => write!(f, "connecting"),
            ClientStatus::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_transitions() {
        use ConnectionState::*;
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Connecting));

        assert!(!Closed.can_transition_to(Open));
        assert!(!Open.can_transition_to(Connecting));
        assert!(!Connecting.can_transition_to(Connecting));
    }

    #[test]
    fn test_default_is_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert_eq!(ClientStatus::default(), ClientStatus::Connecting);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Open).unwrap(),
            "\"open\""
        );
        assert_eq!(
            serde_json::to_string(&ClientStatus::Connected).unwrap(),
            "\"connected\""
        );
    }
}
