//! Config file handling.

use hubsocket::{ClientConfig, HubError, ReconnectPolicy};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_saved_config_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hub.toml");

    let mut config = ClientConfig::new("wss://hub.example/api/websocket", "secret");
    config.reconnect_backoff_ms = 750;
    config.max_concurrent_handlers = 8;
    config
        .headers
        .insert("X-Forwarded-For".to_string(), "10.0.0.2".to_string());
    config.save(&path).unwrap();

    let loaded = ClientConfig::load(&path).unwrap();
    assert_eq!(loaded.url, "wss://hub.example/api/websocket");
    assert_eq!(loaded.token, "secret");
    assert_eq!(
        loaded.reconnect_policy(),
        ReconnectPolicy::Fixed(Duration::from_millis(750))
    );
    assert_eq!(loaded.max_concurrent_handlers, 8);
    assert_eq!(loaded.headers, config.headers);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = ClientConfig::load(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(HubError::Io(_))));
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hub.toml");
    std::fs::write(&path, "reconnect_backoff_ms = \"soon\"\n").unwrap();

    assert!(matches!(ClientConfig::load(&path), Err(HubError::Config(_))));
}
