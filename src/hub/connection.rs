//! Connection Manager
//!
//! Single responsibility: Own the socket of the live generation, serialize
//! every write to it, and run its one read loop.
//!
//! # Generations
//!
//! ```text
//!   open() ──▶ gen 1 ──failure──▶ teardown ──backoff──▶ gen 2 ──close()──▶ teardown
//!               │                                        │
//!               ├─ read loop (1 task)                    ├─ read loop (1 task)
//!               └─ auth deadline (1 task)                └─ auth deadline (1 task)
//! ```
//!
//! Opening and tearing down happen under one lock. Teardown stops the read
//! loop and waits for it to exit before the socket is detached, so two
//! read loops never run at once. Everything spawned for a generation
//! carries its number; the supervisor ignores failures reported by a
//! generation that is no longer current.
//!
//! # Locks
//!
//! | Lock                    | Guards                                  |
//! |-------------------------|-----------------------------------------|
//! | `conn`                  | open/close/reconnect transitions        |
//! | `writer`                | the socket sink, request ID assignment  |
//! | correlator map          | pending requests                        |
//! | registry `RwLock`       | event handlers                          |
//!
//! The read loop never takes `conn`, which is what lets teardown wait on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::auth::AuthGate;
use super::correlator::{Correlator, PendingResult};
use super::protocol::{decode_envelope, encode_command, Command, Envelope, EnvelopeKind, AUTH_KIND};
use super::subscriptions::SubscriptionRegistry;
use super::transport::{self, WsSink, WsStream};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::HubError;

/// Write half of the live generation.
struct Writer {
    generation: u64,
    sink: WsSink,
}

/// Tasks and signals belonging to one open generation.
struct LiveGeneration {
    generation: u64,
    stop: CancellationToken,
    reader: JoinHandle<()>,
    deadline: JoinHandle<()>,
}

#[derive(Default)]
struct ConnState {
    live: Option<LiveGeneration>,
}

/// Shared state behind every `Client` clone.
pub(crate) struct Inner {
    pub(super) config: ClientConfig,
    pub(super) policy: ReconnectPolicy,
    conn: Mutex<ConnState>,
    writer: Mutex<Option<Writer>>,
    pub(super) auth: AuthGate,
    pub(super) correlator: Arc<Correlator>,
    pub(super) subscriptions: SubscriptionRegistry,
    /// Last generation opened
    generation: AtomicU64,
    running: AtomicBool,
    /// Set by an explicit close or a terminal failure
    pub(super) shutdown: AtomicBool,
    /// Generation whose failure already scheduled a reconnect
    pub(super) reconnect_for: AtomicU64,
}

impl Inner {
    pub(super) fn new(config: ClientConfig) -> Self {
        let policy = config.reconnect_policy();
        let subscriptions = SubscriptionRegistry::new(config.max_concurrent_handlers);
        Self {
            config,
            policy,
            conn: Mutex::new(ConnState::default()),
            writer: Mutex::new(None),
            auth: AuthGate::new(),
            correlator: Arc::new(Correlator::new()),
            subscriptions,
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            reconnect_for: AtomicU64::new(0),
        }
    }

    pub(super) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open a new generation, tearing down the current one first.
    ///
    /// With `only_if_down`, does nothing when a generation is already live,
    /// and refuses with `Closed` after an explicit close; this is the
    /// variant reconnects use.
    pub(super) async fn open_conditional(self: &Arc<Self>, only_if_down: bool) -> Result<(), HubError> {
        let mut conn = self.conn.lock().await;

        if only_if_down {
            if conn.live.is_some() {
                debug!("Connection already running, reopen skipped");
                return Ok(());
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(HubError::Closed);
            }
        }

        self.teardown_locked(&mut conn).await;

        let (sink, stream) = transport::connect(
            &self.config.url,
            &self.config.headers,
            self.config.handshake_timeout(),
        )
        .await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut writer = self.writer.lock().await;
            self.correlator.reset_ids();
            *writer = Some(Writer { generation, sink });
        }

        self.shutdown.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self.auth.begin(generation);

        let stop = CancellationToken::new();
        let auth_disarm = stop.child_token();
        let deadline = self.arm_auth_deadline(generation, auth_disarm.clone());
        let reader = tokio::spawn(Arc::clone(self).read_loop(generation, stream, stop.clone(), auth_disarm));

        conn.live = Some(LiveGeneration {
            generation,
            stop,
            reader,
            deadline,
        });

        info!(url = %self.config.url, generation, "Hub connection opened");
        Ok(())
    }

    /// Explicit close: no reconnect until the next `open`.
    pub(super) async fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.auth.set_closed(true);
        let mut conn = self.conn.lock().await;
        // An open that held the lock may have cleared the flags
        self.shutdown.store(true, Ordering::SeqCst);
        self.auth.set_closed(true);
        self.teardown_locked(&mut conn).await;
    }

    /// Tear down `generation` if it is still the live one.
    pub(super) async fn teardown_generation(&self, generation: u64) {
        let mut conn = self.conn.lock().await;
        if conn.live.as_ref().map(|l| l.generation) == Some(generation) {
            self.teardown_locked(&mut conn).await;
        }
    }

    /// Stop the live generation. Leaves the reconnect policy alone.
    async fn teardown_locked(&self, conn: &mut ConnState) {
        let Some(live) = conn.live.take() else {
            return;
        };
        let generation = live.generation;
        debug!(generation, "Tearing down connection");

        live.stop.cancel();
        live.deadline.abort();
        if let Err(e) = live.reader.await {
            if e.is_panic() {
                error!(generation, "Read loop panicked");
            }
        }

        // The read loop has exited; the socket can go
        if let Some(mut writer) = self.writer.lock().await.take() {
            transport::close(&mut writer.sink).await;
        }

        self.running.store(false, Ordering::SeqCst);
        self.correlator.abandon(generation);
        self.auth.end(generation);

        info!(generation, "Hub connection closed");
    }

    /// Write a frame on `generation` without the auth gate.
    pub(super) async fn write_frame(&self, generation: u64, text: String) -> Result<(), HubError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) if w.generation == generation => transport::send_text(&mut w.sink, text).await,
            _ => Err(HubError::ConnectionLost),
        }
    }

    /// Gate, number, and write a command.
    ///
    /// With `expect_result`, the waiter is registered before the write so a
    /// fast reply cannot be missed. Returns `None` when no waiter was
    /// registered (no result wanted, or the auth message).
    pub(super) async fn send_command<C: Command + ?Sized>(
        self: &Arc<Self>,
        command: &C,
        expect_result: bool,
    ) -> Result<Option<PendingResult>, HubError> {
        if self.auth.is_closed() {
            return Err(HubError::Closed);
        }

        let kind = command.kind().to_string();
        let is_auth = kind == AUTH_KIND;

        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(HubError::NotAuthenticated { kind });
        };
        let generation = w.generation;
        if !is_auth && !self.auth.is_authenticated(generation) {
            return Err(HubError::NotAuthenticated { kind });
        }

        let id = (!is_auth).then(|| self.correlator.next_id());
        let text = encode_command(id, command)?;
        let pending = match id {
            Some(id) if expect_result => Some(self.correlator.register(generation, id)),
            _ => None,
        };

        debug!(id = ?id, kind = %kind, generation, "Sending command");
        if let Err(e) = transport::send_text(&mut w.sink, text).await {
            drop(pending);
            drop(writer);
            self.handle_failure(generation, &e);
            return Err(e);
        }

        Ok(pending)
    }

    /// Send and wait, discarding the result payload.
    pub(super) async fn call<C: Command + ?Sized>(self: &Arc<Self>, command: &C) -> Result<(), HubError> {
        match self.send_command(command, true).await? {
            Some(pending) => pending.wait().await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// The only reader of a generation's socket.
    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        mut stream: WsStream,
        stop: CancellationToken,
        auth_disarm: CancellationToken,
    ) {
        debug!(generation, "Read loop started");

        let failure = loop {
            let frame = tokio::select! {
                biased;
                _ = stop.cancelled() => break None,
                frame = transport::recv_text(&mut stream) => frame,
            };

            // A deliberate shutdown is not a failure
            if stop.is_cancelled() {
                break None;
            }

            let text = match frame {
                Ok(Some(text)) => text,
                Ok(None) => break Some(HubError::Transport("connection closed by hub".into())),
                Err(e) => break Some(e),
            };

            let envelope = match decode_envelope(&text) {
                Ok(envelope) => envelope,
                Err(e) => break Some(e),
            };

            if !self.route(generation, envelope, &stop, &auth_disarm).await {
                // The handshake failed; the socket is done for this generation
                self.running.store(false, Ordering::SeqCst);
                break None;
            }
        };

        if let Some(e) = failure {
            // Dead before teardown gets to it
            self.running.store(false, Ordering::SeqCst);
            self.handle_failure(generation, &e);
        }

        debug!(generation, "Read loop ended");
    }

    /// Handle one envelope in arrival order. Returns false to end the loop.
    async fn route(
        self: &Arc<Self>,
        generation: u64,
        envelope: Envelope,
        stop: &CancellationToken,
        auth_disarm: &CancellationToken,
    ) -> bool {
        match envelope.kind {
            EnvelopeKind::Result => {
                self.correlator.resolve(generation, envelope);
            }
            EnvelopeKind::Event => match envelope.event {
                Some(event) => {
                    self.subscriptions.dispatch(event).await;
                }
                None => debug!(id = ?envelope.id, "Event envelope without event"),
            },
            EnvelopeKind::AuthRequired => self.on_auth_required(generation, stop).await,
            EnvelopeKind::AuthOk => self.on_auth_ok(generation, auth_disarm),
            EnvelopeKind::AuthInvalid => {
                self.on_auth_invalid(generation, envelope.message, auth_disarm);
                return false;
            }
            EnvelopeKind::Unknown => debug!(id = ?envelope.id, "Ignoring envelope of unknown type"),
        }
        true
    }
}
