//! Typed remote calls
//!
//! Commands for the hub's common remote calls and the `Client` methods
//! that send them. Anything not covered here can go through
//! `RawCommand` and `Client::request`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::HubError;
use crate::hub::{Client, Command};

/// Which devices, entities, or areas a service call applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallServiceTarget {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_id: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_id: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub area_id: Vec<String>,
}

impl CallServiceTarget {
    pub fn entities<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_id: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Invoke `domain.service` on the hub.
#[derive(Debug, Clone, Serialize)]
pub struct CallService {
    pub domain: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<CallServiceTarget>,
}

impl Command for CallService {
    fn kind(&self) -> &str {
        "call_service"
    }
}

/// Snapshot of every entity state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GetStates {}

impl Command for GetStates {
    fn kind(&self) -> &str {
        "get_states"
    }
}

/// One entity's state as the hub reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Client {
    /// Call a service and wait for the hub to accept it.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Option<Map<String, Value>>,
        target: Option<CallServiceTarget>,
    ) -> Result<(), HubError> {
        debug!(domain = %domain, service = %service, "Calling service");
        self.call(&CallService {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data,
            target,
        })
        .await
    }

    /// Fetch the current state of every entity.
    pub async fn get_states(&self) -> Result<Vec<State>, HubError> {
        let states: Option<Vec<State>> = self.request(&GetStates {}).await?;
        Ok(states.unwrap_or_default())
    }
}
