use moonlink::{client_config, Config};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_file_drives_client_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        "[connection]\nhost = \"printer.local:7125\"\ncall_timeout_ms = 4000\n\n[logging]\njson = true\n",
    )
    .unwrap();

    let config = Config::load_or_default(&path).unwrap();
    assert_eq!(
        config.connection.websocket_url().as_deref(),
        Some("ws://printer.local:7125/websocket")
    );
    assert!(config.logging.json);

    let client = client_config(&config.connection);
    assert_eq!(client.call_timeout, Duration::from_millis(4_000));
    assert_eq!(client.reconnect_interval, Duration::from_millis(3_000));
}

#[test]
fn test_missing_config_leaves_client_dormant() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_or_default(&dir.path().join("config.toml")).unwrap();
    assert_eq!(config.connection.websocket_url(), None);
}

#[tokio::test]
async fn test_client_without_host_stays_closed() {
    let config = Config::default();
    let client = moonlink::RpcClient::with_websocket(
        client_config(&config.connection),
        std::sync::Arc::new(moonlink::NoMigrations),
    );
    assert!(!client.connect(config.connection.websocket_url().as_deref()));
    assert_eq!(client.connection_state(), moonlink::ConnectionState::Closed);
    client.shutdown().await;
}
