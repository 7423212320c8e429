//! Reconnection Supervisor
//!
//! Single responsibility: Decide what a connection failure means and, when
//! reconnection is enabled, bring the connection back.
//!
//! # Reconnection Policy
//!
//! Every read, write, auth, and replay failure ends up in `handle_failure`
//! tagged with the generation that produced it.
//! 1. A failure from a generation that is no longer current is ignored
//! 2. After an explicit close, failures are only logged
//! 3. With reconnection disabled, the client becomes permanently closed
//! 4. Otherwise one reconnect task per failed generation tears it down,
//!    waits the backoff, and reopens; dial failures retry at the same
//!    interval until a reopen succeeds or the client is closed

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::connection::Inner;
use crate::config::ReconnectPolicy;
use crate::error::HubError;

impl Inner {
    /// Single entry point for connection failures.
    pub(super) fn handle_failure(self: &Arc<Self>, generation: u64, error: &HubError) {
        if generation != self.current_generation() {
            debug!(generation, error = %error, "Failure from superseded generation ignored");
            return;
        }
        if self.shutdown.load(Ordering::SeqCst) {
            debug!(generation, error = %error, "Failure after close ignored");
            return;
        }

        match self.policy {
            ReconnectPolicy::Disabled => {
                error!(generation, error = %error, "Hub connection failed, reconnection disabled");
                self.shutdown.store(true, Ordering::SeqCst);
                self.auth.set_closed(true);

                let inner = Arc::clone(self);
                tokio::spawn(async move { inner.teardown_generation(generation).await });
            }
            ReconnectPolicy::Fixed(backoff) => {
                // One reconnect per failed generation
                if self.reconnect_for.swap(generation, Ordering::SeqCst) == generation {
                    debug!(generation, "Reconnect already scheduled");
                    return;
                }
                warn!(generation, error = %error, delay = ?backoff, "Hub connection failed, reconnecting");
                tokio::spawn(Arc::clone(self).timed_reconnect(generation, backoff));
            }
        }
    }

    async fn timed_reconnect(self: Arc<Self>, generation: u64, backoff: Duration) {
        self.teardown_generation(generation).await;

        let mut attempt = 0u32;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!(generation, "Client closed, reconnect abandoned");
                return;
            }

            tokio::time::sleep(backoff).await;
            attempt += 1;

            match self.open_conditional(true).await {
                Ok(()) => {
                    info!(attempt, "Reconnected to hub");
                    return;
                }
                Err(HubError::Closed) => {
                    debug!("Client closed during backoff");
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, delay = ?backoff, "Reconnect failed, retrying");
                }
            }
        }
    }
}
