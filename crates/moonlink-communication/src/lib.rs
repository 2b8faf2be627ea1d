//! # Moonlink Communication
//!
//! The real-time control channel to a Moonraker-style printer backend.
//! A single [`ConnectionManager`] owns the WebSocket and reconnects after
//! drops; the [`ReadinessGate`] holds callers back until the channel is
//! open and migrations have run; the [`CallRegistry`] correlates JSON-RPC
//! responses with outstanding calls and enforces per-call timeouts.
//! [`RpcClient`] ties them together and [`NamespacedStore`] layers the
//! database item calls on top.

pub mod communication;
pub mod migration;
pub mod rpc;
pub mod store;

pub use communication::{
    connection::{ConnectionManager, FrameHandler},
    websocket::WebSocketConnector,
    Channel, Connector, FrameSink, FrameStream,
};
pub use migration::{MigrationRunner, NoMigrations};
pub use rpc::{
    client::{ClientConfig, RpcClient, DEFAULT_CALL_TIMEOUT, DEFAULT_RECONNECT_INTERVAL},
    gate::ReadinessGate,
    protocol::{CallEnvelope, InboundFrame, JSONRPC_VERSION},
    registry::{CallIds, CallRegistry, PendingCallHandle, RegistryStats},
};
pub use store::{DbItem, NamespacedStore, StoreEntry, GET_ITEM_METHOD, POST_ITEM_METHOD};
