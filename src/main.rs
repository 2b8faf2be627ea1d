use anyhow::Context;
use moonlink::{client_config, init_logging, ClientEvent, Config, NoMigrations, RpcClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => moonlink_settings::default_config_path()?,
    };
    let mut config = Config::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.apply_env_overrides();
    config.validate()?;

    init_logging(&config.logging)?;
    info!(
        version = moonlink::VERSION,
        build_date = moonlink::BUILD_DATE,
        config = %path.display(),
        "Starting moonlink"
    );

    let client = RpcClient::with_websocket(
        client_config(&config.connection),
        Arc::new(NoMigrations),
    );
    let mut events = client.subscribe();

    if !client.connect(config.connection.websocket_url().as_deref()) {
        warn!("No backend host configured; set connection.host or MOONLINK_HOST");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::Message(message)) => info!(
                    method = message.method().unwrap_or("<response>"),
                    payload = %message.payload,
                    "Message received"
                ),
                Ok(event) => info!(%event, "Client event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                info!("Interrupted; shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
