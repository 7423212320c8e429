//! hubsocket - watch a hub's event stream
//!
//! Connects, authenticates, and logs every event of the chosen types until
//! interrupted. Reconnects on its own when the hub goes away.
//!
//! ## Usage
//!
//! ```bash
//! # Watch state changes
//! HUB_TOKEN=... hubsocket --url ws://hub.local:8123/api/websocket
//!
//! # Print every entity state first, then watch two event types
//! hubsocket --config hub.toml --snapshot --event state_changed --event call_service
//! ```

use anyhow::Context;
use clap::Parser;
use hubsocket::{Client, ClientConfig, EventData};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hubsocket")]
#[command(about = "Watch events from a smart-hub WebSocket API")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hub WebSocket URL
    #[arg(long, env = "HUB_URL")]
    url: Option<String>,

    /// Long-lived access token
    #[arg(long, env = "HUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Event type to subscribe to (repeatable)
    #[arg(long = "event", default_value = "state_changed")]
    events: Vec<String>,

    /// Print all entity states before watching
    #[arg(long)]
    snapshot: bool,

    /// Delay between reconnect attempts; 0 disables reconnection
    #[arg(long)]
    reconnect_backoff_ms: Option<i64>,

    /// Give up if authentication takes longer than this
    #[arg(long, default_value_t = 10_000)]
    auth_wait_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hubsocket=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    // Apply CLI overrides
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(token) = args.token {
        config.token = token;
    }
    if let Some(backoff) = args.reconnect_backoff_ms {
        config.reconnect_backoff_ms = backoff;
    }

    info!(url = %config.url, events = ?args.events, "Starting hubsocket");

    let client = Client::new(config)?;
    client.open().await.context("connecting to hub")?;
    client
        .wait_auth_timeout(std::time::Duration::from_millis(args.auth_wait_ms))
        .await
        .context("authenticating with hub")?;

    if args.snapshot {
        let states = client.get_states().await.context("fetching states")?;
        info!(count = states.len(), "State snapshot");
        for state in &states {
            println!("{}", serde_json::to_string(state)?);
        }
    }

    for event_type in &args.events {
        client
            .subscribe(event_type.clone(), |event: EventData| match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Unprintable event"),
            })
            .await
            .with_context(|| format!("subscribing to {}", event_type))?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, closing");
    client.close().await;
    Ok(())
}
