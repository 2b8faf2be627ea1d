//! Transport abstraction for the control channel
//!
//! The client is written against an ordered, reliable, message-oriented
//! duplex channel. A [`Connector`] opens one and hands back its two halves
//! so reads and writes can proceed concurrently.

pub mod connection;
pub mod websocket;

use async_trait::async_trait;
use moonlink_core::ConnectionError;

/// Write half of an open channel
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Close the channel gracefully
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Read half of an open channel
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame
    ///
    /// Returns `None` once the peer has closed the channel.
    async fn next_text(&mut self) -> Option<Result<String, ConnectionError>>;
}

/// An open duplex channel
pub struct Channel {
    /// Outbound half
    pub sink: Box<dyn FrameSink>,
    /// Inbound half
    pub stream: Box<dyn FrameStream>,
}

impl Channel {
    /// Bundle two halves into a channel
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Opens channels to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a channel to `endpoint`
    async fn connect(&self, endpoint: &str) -> Result<Channel, ConnectionError>;
}
