//! Authentication Handshake State
//!
//! Single responsibility: Track where each connection generation is in the
//! auth handshake and wake the tasks waiting on it.
//!
//! # Handshake
//!
//! ```text
//! Idle ──(socket opens)──▶ Waiting ──auth_ok──────────▶ Authenticated
//!                             │
//!                             ├──auth_invalid──────────▶ Failed
//!                             ├──deadline expired──────▶ Failed
//!                             └──connection lost───────▶ Failed
//! ```
//!
//! `Failed` and `Authenticated` are terminal for a generation. The next
//! generation starts again at `Waiting`.
//!
//! # Generations
//!
//! Every published snapshot carries the generation it describes. A waiter
//! binds to the first generation it sees in `Waiting` and only accepts
//! that generation's outcome; if a newer generation appears first, the
//! waiter gets `AuthSuperseded` instead of someone else's result.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::Inner;
use super::protocol::{encode_command, Auth};
use crate::error::HubError;

/// Handshake state of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Waiting,
    Authenticated,
    Failed,
}

/// How a generation's handshake ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Rejected(String),
    TimedOut,
    ConnectionLost,
}

impl AuthOutcome {
    fn into_result(self) -> Result<(), HubError> {
        match self {
            AuthOutcome::Authenticated => Ok(()),
            AuthOutcome::Rejected(message) => Err(HubError::AuthRejected(message)),
            AuthOutcome::TimedOut => Err(HubError::AuthTimeout),
            AuthOutcome::ConnectionLost => Err(HubError::ConnectionLost),
        }
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    generation: u64,
    state: AuthState,
    /// Most recent resolved generation and its outcome
    resolved: Option<(u64, AuthOutcome)>,
    /// No further generation will be opened without an explicit open
    closed: bool,
}

/// Publishes handshake progress to any number of waiters.
pub struct AuthGate {
    tx: watch::Sender<Snapshot>,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot {
            generation: 0,
            state: AuthState::Idle,
            resolved: None,
            closed: false,
        });
        Self { tx }
    }

    pub fn state(&self) -> AuthState {
        self.tx.borrow().state
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().closed
    }

    /// Whether `generation` is the current one and has authenticated.
    pub fn is_authenticated(&self, generation: u64) -> bool {
        let snap = self.tx.borrow();
        snap.generation == generation && snap.state == AuthState::Authenticated
    }

    /// A new socket generation opened; its handshake is now pending.
    pub fn begin(&self, generation: u64) {
        self.tx.send_modify(|snap| {
            snap.generation = generation;
            snap.state = AuthState::Waiting;
            snap.closed = false;
        });
        debug!(generation, "Auth handshake pending");
    }

    /// Resolve `generation` if it is current and still waiting.
    ///
    /// Returns false when the outcome arrived too late to matter.
    pub fn resolve(&self, generation: u64, outcome: AuthOutcome) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|snap| {
            if snap.generation != generation || snap.state != AuthState::Waiting {
                return false;
            }
            snap.state = match outcome {
                AuthOutcome::Authenticated => AuthState::Authenticated,
                _ => AuthState::Failed,
            };
            snap.resolved = Some((generation, outcome.clone()));
            applied = true;
            true
        });
        if applied {
            debug!(generation, outcome = ?outcome, "Auth handshake resolved");
        }
        applied
    }

    /// The generation was torn down. An unresolved handshake fails with
    /// `ConnectionLost`; the state returns to `Idle`.
    pub fn end(&self, generation: u64) {
        self.tx.send_if_modified(|snap| {
            if snap.generation != generation {
                return false;
            }
            if snap.state == AuthState::Waiting {
                snap.resolved = Some((generation, AuthOutcome::ConnectionLost));
            }
            snap.state = AuthState::Idle;
            true
        });
    }

    /// Mark the client closed (explicitly, or after a terminal failure).
    pub fn set_closed(&self, closed: bool) {
        self.tx.send_modify(|snap| snap.closed = closed);
    }

    /// Block until the handshake this call is bound to resolves.
    ///
    /// - `Authenticated` on the current generation returns immediately.
    /// - `Failed` on the current generation returns its error immediately.
    /// - While `Idle`, waits for the next generation.
    /// - A closed client fails at once, with the last handshake failure if
    ///   that is what closed it.
    pub async fn wait(&self) -> Result<(), HubError> {
        let mut rx = self.tx.subscribe();
        let mut bound: Option<u64> = None;

        loop {
            {
                let snap = rx.borrow_and_update();

                if let Some(generation) = bound {
                    if let Some((resolved, outcome)) = &snap.resolved {
                        if *resolved == generation {
                            return outcome.clone().into_result();
                        }
                    }
                    if snap.generation != generation {
                        return Err(HubError::AuthSuperseded);
                    }
                    if snap.closed {
                        return Err(HubError::Closed);
                    }
                } else if snap.closed {
                    // Report why a terminal failure closed the client
                    return match &snap.resolved {
                        Some((g, outcome))
                            if *g == snap.generation && *outcome != AuthOutcome::Authenticated =>
                        {
                            outcome.clone().into_result()
                        }
                        _ => Err(HubError::Closed),
                    };
                } else {
                    match snap.state {
                        AuthState::Authenticated => return Ok(()),
                        AuthState::Failed => {
                            return match &snap.resolved {
                                Some((g, outcome)) if *g == snap.generation => {
                                    outcome.clone().into_result()
                                }
                                _ => Err(HubError::ConnectionLost),
                            }
                        }
                        AuthState::Waiting => bound = Some(snap.generation),
                        AuthState::Idle => {}
                    }
                }
            }

            // The sender lives as long as the gate; a closed channel means
            // the client is being dropped.
            if rx.changed().await.is_err() {
                return Err(HubError::Closed);
            }
        }
    }
}

impl Inner {
    /// Fail the handshake of `generation` if it is still pending when the
    /// deadline passes. Cancelled through `disarm` on `auth_ok` or teardown.
    pub(super) fn arm_auth_deadline(self: &Arc<Self>, generation: u64, disarm: CancellationToken) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let timeout = self.config.auth_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = disarm.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if inner.auth.resolve(generation, AuthOutcome::TimedOut) {
                        warn!(generation, timeout = ?timeout, "Hub did not acknowledge auth in time");
                        inner.handle_failure(generation, &HubError::AuthTimeout);
                    }
                }
            }
        })
    }

    /// Answer `auth_required` with the credential message.
    pub(super) async fn on_auth_required(self: &Arc<Self>, generation: u64, stop: &CancellationToken) {
        debug!(generation, "Hub requested authentication");

        let auth = Auth {
            access_token: self.config.token.clone(),
        };
        let text = match encode_command(None, &auth) {
            Ok(text) => text,
            Err(e) => {
                self.handle_failure(generation, &e);
                return;
            }
        };

        tokio::select! {
            _ = stop.cancelled() => {}
            result = self.write_frame(generation, text) => {
                if let Err(e) = result {
                    self.handle_failure(generation, &e);
                }
            }
        }
    }

    pub(super) fn on_auth_ok(self: &Arc<Self>, generation: u64, disarm: &CancellationToken) {
        disarm.cancel();
        if !self.auth.resolve(generation, AuthOutcome::Authenticated) {
            return;
        }
        info!(generation, "Authenticated with hub");

        tokio::spawn(Arc::clone(self).replay(generation));
    }

    pub(super) fn on_auth_invalid(self: &Arc<Self>, generation: u64, message: Option<String>, disarm: &CancellationToken) {
        disarm.cancel();
        let message = message.unwrap_or_else(|| "invalid credentials".to_string());
        if self.auth.resolve(generation, AuthOutcome::Rejected(message.clone())) {
            warn!(generation, reason = %message, "Hub rejected authentication");
            self.handle_failure(generation, &HubError::AuthRejected(message));
        }
    }
}
