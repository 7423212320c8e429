//! State change routing
//!
//! Decodes `state_changed` events and hands each one to the handler
//! registered for its entity, falling back to a default handler.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::HubError;
use crate::hub::{Client, EventData, EventHandler};
use crate::services::State;

/// Event type carrying entity state transitions.
pub const STATE_CHANGED: &str = "state_changed";

/// Payload of a `state_changed` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateChangeEvent {
    pub entity_id: String,
    /// `None` when the entity was just added
    #[serde(default)]
    pub old_state: Option<State>,
    /// `None` when the entity was removed
    #[serde(default)]
    pub new_state: Option<State>,
}

/// Receives state changes for one entity (or as the default).
#[async_trait]
pub trait StateChangeHandler: Send + Sync + 'static {
    async fn on_state_change(&self, event: StateChangeEvent);
}

#[async_trait]
impl<F> StateChangeHandler for F
where
    F: Fn(StateChangeEvent) + Send + Sync + 'static,
{
    async fn on_state_change(&self, event: StateChangeEvent) {
        (self)(event)
    }
}

#[derive(Default)]
struct Routes {
    by_entity: HashMap<String, Arc<dyn StateChangeHandler>>,
    fallback: Option<Arc<dyn StateChangeHandler>>,
}

/// Fans `state_changed` out by entity ID.
///
/// Clones share their routes, so handlers can be added after `register`.
#[derive(Clone, Default)]
pub struct StateChangeRouter {
    routes: Arc<RwLock<Routes>>,
}

impl StateChangeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe this router to `state_changed` on `client`.
    pub async fn register(&self, client: &Client) -> Result<(), HubError> {
        client.subscribe(STATE_CHANGED, self.clone()).await
    }

    pub async fn add_handler<H: StateChangeHandler>(&self, entity_id: impl Into<String>, handler: H) {
        self.routes
            .write()
            .await
            .by_entity
            .insert(entity_id.into(), Arc::new(handler));
    }

    pub async fn remove_handler(&self, entity_id: &str) -> bool {
        self.routes.write().await.by_entity.remove(entity_id).is_some()
    }

    /// Handler for entities without one of their own.
    pub async fn set_default_handler<H: StateChangeHandler>(&self, handler: H) {
        self.routes.write().await.fallback = Some(Arc::new(handler));
    }

    /// Run the matching handler on its own task. Returns false when no
    /// handler matched.
    pub async fn route(&self, event: StateChangeEvent) -> bool {
        let handler = {
            let routes = self.routes.read().await;
            match routes.by_entity.get(&event.entity_id).or(routes.fallback.as_ref()) {
                Some(handler) => Arc::clone(handler),
                None => {
                    debug!(entity_id = %event.entity_id, "No state change handler");
                    return false;
                }
            }
        };

        tokio::spawn(async move { handler.on_state_change(event).await });
        true
    }
}

#[async_trait]
impl EventHandler for StateChangeRouter {
    async fn on_event(&self, event: EventData) {
        match serde_json::from_value::<StateChangeEvent>(event.data) {
            Ok(change) => {
                self.route(change).await;
            }
            Err(e) => warn!(error = %e, "Invalid state change event"),
        }
    }
}
