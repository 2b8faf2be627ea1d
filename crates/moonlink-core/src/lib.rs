//! # Moonlink Core
//!
//! Core types, errors and events shared by the Moonlink crates.
//! Provides the connection state machine, the error taxonomy used by
//! every call path, and the broadcast dispatcher observers subscribe to.

pub mod error;
pub mod event;
pub mod state;

pub use error::{ConnectionError, Error, MigrationError, Result, RpcError};
pub use event::{ClientEvent, EventDispatcher, ReceivedMessage};
pub use state::{ClientStatus, ConnectionState};
