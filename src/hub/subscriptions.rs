//! Event Subscriptions
//!
//! Single responsibility: Remember which handler owns each event type,
//! keep the hub subscribed to every registered type, and run handlers off
//! the read loop.
//!
//! # Lifecycle of a subscription
//!
//! ```text
//! subscribe("state_changed", h)
//!        │
//!        ├── not authenticated ──▶ stored, sent later by replay
//!        │
//!        └── authenticated ──▶ replay pending registrations first
//!                              then `subscribe_events` once per generation
//! ```
//!
//! Registrations survive reconnects. After every successful handshake the
//! whole registry is replayed in key order before any new event type is
//! sent. A failed replay is a connection failure and goes to the
//! supervisor; a partially subscribed connection is never left running.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock, Semaphore};
use tracing::{debug, info, warn};

use super::connection::Inner;
use super::protocol::{EventData, SubscribeEvents};
use crate::error::HubError;

/// Receives events of one type.
///
/// Each invocation runs on its own task, so a slow handler never holds up
/// the connection.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn on_event(&self, event: EventData);
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(EventData) + Send + Sync + 'static,
{
    async fn on_event(&self, event: EventData) {
        (self)(event)
    }
}

struct Entry {
    handler: Arc<dyn EventHandler>,
    /// Generation on which the hub acknowledged `subscribe_events`
    active_generation: Option<u64>,
}

/// Event type → handler, plus the replay lock.
pub struct SubscriptionRegistry {
    entries: RwLock<BTreeMap<String, Entry>>,
    /// Last generation whose registrations were fully replayed
    replayed: Mutex<u64>,
    limiter: Option<Arc<Semaphore>>,
}

impl SubscriptionRegistry {
    /// `max_concurrent_handlers` of 0 leaves handler concurrency unbounded.
    pub fn new(max_concurrent_handlers: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            replayed: Mutex::new(0),
            limiter: (max_concurrent_handlers > 0)
                .then(|| Arc::new(Semaphore::new(max_concurrent_handlers))),
        }
    }

    /// Hand an event to its handler on a new task.
    ///
    /// Events with no registered handler are dropped.
    pub async fn dispatch(&self, event: EventData) -> bool {
        let handler = {
            let entries = self.entries.read().await;
            match entries.get(&event.event_type) {
                Some(entry) => Arc::clone(&entry.handler),
                None => {
                    debug!(event_type = %event.event_type, "No handler for event, dropped");
                    return false;
                }
            }
        };

        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let _permit = match limiter {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };
            handler.on_event(event).await;
        });
        true
    }

    /// Store `handler` for `category`, replacing any previous one.
    ///
    /// `active` records the generation the hub acknowledged; `None` keeps
    /// whatever was recorded before.
    pub async fn set_handler(&self, category: &str, handler: Arc<dyn EventHandler>, active: Option<u64>) {
        let mut entries = self.entries.write().await;
        match entries.get_mut(category) {
            Some(entry) => {
                entry.handler = handler;
                if active.is_some() {
                    entry.active_generation = active;
                }
            }
            None => {
                entries.insert(
                    category.to_string(),
                    Entry {
                        handler,
                        active_generation: active,
                    },
                );
            }
        }
    }

    pub async fn remove(&self, category: &str) -> bool {
        self.entries.write().await.remove(category).is_some()
    }

    pub async fn is_active(&self, category: &str, generation: u64) -> bool {
        self.entries
            .read()
            .await
            .get(category)
            .is_some_and(|e| e.active_generation == Some(generation))
    }

    pub async fn mark_active(&self, category: &str, generation: u64) {
        if let Some(entry) = self.entries.write().await.get_mut(category) {
            entry.active_generation = Some(generation);
        }
    }

    /// Registered event types, in replay order.
    pub async fn categories(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    async fn lock_replay(&self) -> MutexGuard<'_, u64> {
        self.replayed.lock().await
    }
}

impl Inner {
    /// Register a handler; subscribe on the hub now if authenticated.
    pub(super) async fn subscribe(
        self: &Arc<Self>,
        category: String,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), HubError> {
        // Nothing would ever replay a registration on a closed client
        if self.auth.is_closed() {
            return Err(HubError::Closed);
        }

        let mut replayed = self.subscriptions.lock_replay().await;

        let generation = self.current_generation();
        if !self.auth.is_authenticated(generation) {
            debug!(event_type = %category, "Not authenticated, subscription deferred");
            self.subscriptions.set_handler(&category, handler, None).await;
            return Ok(());
        }

        if let Err(e) = self.ensure_replayed(&mut replayed, generation).await {
            self.handle_failure(generation, &e);
            return Err(e);
        }

        if self.subscriptions.is_active(&category, generation).await {
            debug!(event_type = %category, "Already subscribed, handler replaced");
            self.subscriptions.set_handler(&category, handler, None).await;
            return Ok(());
        }

        self.call(&SubscribeEvents {
            event_type: category.clone(),
        })
        .await?;
        self.subscriptions
            .set_handler(&category, handler, Some(generation))
            .await;
        info!(event_type = %category, generation, "Subscribed to events");
        Ok(())
    }

    pub(super) async fn unsubscribe(&self, category: &str) -> bool {
        let _replayed = self.subscriptions.lock_replay().await;
        self.subscriptions.remove(category).await
    }

    /// Replay the registry for a freshly authenticated generation.
    pub(super) async fn replay(self: Arc<Self>, generation: u64) {
        let mut replayed = self.subscriptions.lock_replay().await;
        if !self.auth.is_authenticated(generation) {
            debug!(generation, "Generation gone before replay");
            return;
        }
        if let Err(e) = self.ensure_replayed(&mut replayed, generation).await {
            warn!(generation, error = %e, "Subscription replay failed");
            self.handle_failure(generation, &e);
        }
    }

    /// Send `subscribe_events` for every registration not yet active on
    /// `generation`. Must hold the replay lock.
    async fn ensure_replayed(self: &Arc<Self>, replayed: &mut u64, generation: u64) -> Result<(), HubError> {
        if *replayed >= generation {
            return Ok(());
        }

        let categories = self.subscriptions.categories().await;
        let mut sent = 0usize;
        for category in categories {
            if self.subscriptions.is_active(&category, generation).await {
                continue;
            }
            self.call(&SubscribeEvents {
                event_type: category.clone(),
            })
            .await?;
            self.subscriptions.mark_active(&category, generation).await;
            sent += 1;
        }

        *replayed = generation;
        if sent > 0 {
            info!(generation, subscriptions = sent, "Subscriptions replayed");
        }
        Ok(())
    }
}
