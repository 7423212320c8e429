//! Hub Client
//!
//! Single responsibility: The caller-facing handle. Cheap to clone; every
//! clone drives the same connection.
//!
//! # Usage
//!
//! ```ignore
//! let client = Client::new(ClientConfig::new("ws://hub.local:8123/api/websocket", token))?;
//! client.open().await?;
//! client.wait_auth().await?;
//!
//! client.subscribe("state_changed", |event: EventData| {
//!     println!("{}", event.data);
//! }).await?;
//!
//! let states: Vec<State> = client.get_states().await?;
//! ```
//!
//! # Guarantees
//!
//! - Commands sent before authentication fail with `NotAuthenticated`
//!   without touching the socket
//! - Every request is answered exactly once: its result, its error, or
//!   `ConnectionLost` when its connection goes away first
//! - Subscriptions outlive reconnects
//!
//! # Non-Guarantees
//!
//! - Requests in flight when the connection drops are not retried

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::auth::AuthState;
use super::connection::Inner;
use super::protocol::Command;
use super::subscriptions::EventHandler;
use crate::config::ClientConfig;
use crate::error::HubError;

/// Handle to one logical hub connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Build a client. Nothing is dialed until `open`.
    pub fn new(config: ClientConfig) -> Result<Self, HubError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner::new(config)),
        })
    }

    /// Open a new connection generation, replacing any current one.
    ///
    /// Returns once the socket is up; authentication continues in the
    /// background (see `wait_auth`).
    pub async fn open(&self) -> Result<(), HubError> {
        self.inner.open_conditional(false).await
    }

    /// Close the connection and stop reconnecting until the next `open`.
    pub async fn close(&self) {
        self.inner.close().await
    }

    /// Wait for the pending handshake to finish.
    pub async fn wait_auth(&self) -> Result<(), HubError> {
        self.inner.auth.wait().await
    }

    pub async fn wait_auth_timeout(&self, timeout: Duration) -> Result<(), HubError> {
        tokio::time::timeout(timeout, self.wait_auth())
            .await
            .map_err(|_| HubError::Timeout(timeout))?
    }

    /// Route events of `category` to `handler`.
    ///
    /// Before authentication the registration is stored and sent once the
    /// handshake completes. Registering a category again replaces its
    /// handler.
    pub async fn subscribe<H: EventHandler>(
        &self,
        category: impl Into<String>,
        handler: H,
    ) -> Result<(), HubError> {
        self.inner.subscribe(category.into(), Arc::new(handler)).await
    }

    /// Stop routing `category` locally. The hub keeps sending its events
    /// until the next reconnect; they are dropped.
    pub async fn unsubscribe(&self, category: &str) -> bool {
        self.inner.unsubscribe(category).await
    }

    /// Send a command and decode its result payload into `R`.
    pub async fn request<C, R>(&self, command: &C) -> Result<R, HubError>
    where
        C: Command + ?Sized,
        R: DeserializeOwned,
    {
        let value = match self.inner.send_command(command, true).await? {
            Some(pending) => pending.wait().await?,
            None => Value::Null,
        };
        serde_json::from_value(value).map_err(HubError::Decode)
    }

    /// `request` bounded by `timeout`. A timed-out request leaves nothing
    /// pending behind.
    pub async fn request_timeout<C, R>(&self, command: &C, timeout: Duration) -> Result<R, HubError>
    where
        C: Command + ?Sized,
        R: DeserializeOwned,
    {
        tokio::time::timeout(timeout, self.request(command))
            .await
            .map_err(|_| HubError::Timeout(timeout))?
    }

    /// Send a command and wait for it to succeed, ignoring the payload.
    pub async fn call<C: Command + ?Sized>(&self, command: &C) -> Result<(), HubError> {
        self.inner.call(command).await
    }

    pub async fn call_timeout<C: Command + ?Sized>(&self, command: &C, timeout: Duration) -> Result<(), HubError> {
        tokio::time::timeout(timeout, self.call(command))
            .await
            .map_err(|_| HubError::Timeout(timeout))?
    }

    /// Send a command without waiting for (or tracking) its result.
    pub async fn send_no_wait<C: Command + ?Sized>(&self, command: &C) -> Result<(), HubError> {
        self.inner.send_command(command, false).await.map(|_| ())
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.auth.state()
    }

    /// Whether the current generation's socket is open and being read.
    pub fn is_connected(&self) -> bool {
        self.inner.is_running()
    }

    /// Number of the most recently opened generation (0 before the first open).
    pub fn generation(&self) -> u64 {
        self.inner.current_generation()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}
