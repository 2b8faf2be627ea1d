//! # Moonlink
//!
//! A Rust client for the Moonraker JSON-RPC control channel used by 3D-printer
//! configurators:
//! - One shared WebSocket per client, redialled at a fixed interval forever
//! - Calls held back until the channel is open and migrations have run
//! - Id-correlated responses with per-call timeouts
//! - A namespaced key/value store on top of the backend database
//!
//! ## Architecture
//!
//! Moonlink is organized as a workspace with multiple crates:
//!
//! 1. **moonlink-core** - Errors, connection state, client events
//! 2. **moonlink-communication** - Transport, connection manager, readiness
//!    gate, call registry, RPC facade and store
//! 3. **moonlink-settings** - Configuration files and validation
//! 4. **moonlink** - Logging setup and the command-line binary

pub use moonlink_communication::{
    ClientConfig, Connector, DbItem, MigrationRunner, NamespacedStore, NoMigrations, RpcClient,
    StoreEntry, WebSocketConnector,
};

pub use moonlink_core::{
    ClientEvent, ClientStatus, ConnectionError, ConnectionState, Error, EventDispatcher,
    MigrationError, ReceivedMessage, Result, RpcError,
};

pub use moonlink_settings::{Config, ConnectionSettings, LoggingSettings};

use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging from the logging settings
///
/// Sets up structured logging with:
/// - `RUST_LOG` support, falling back to the configured level
/// - Pretty console output, or JSON lines when `json` is set
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))?;

    if settings.json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Client configuration for the given connection settings
pub fn client_config(settings: &ConnectionSettings) -> ClientConfig {
    ClientConfig {
        call_timeout: Duration::from_millis(settings.call_timeout_ms),
        reconnect_interval: Duration::from_millis(settings.reconnect_interval_ms),
        event_capacity: settings.event_capacity,
    }
}
