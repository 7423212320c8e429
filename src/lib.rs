//! hubsocket - Resilient client for a smart-hub WebSocket API
//!
//! Keeps one authenticated connection to the hub, multiplexes requests and
//! pushed events over it, and survives network failures by reconnecting
//! and restoring subscriptions without the caller's involvement.
//!
//! ## Architecture
//!
//! - **hub**: connection lifecycle, auth handshake, request correlation,
//!   event subscriptions, reconnection
//! - **services / state_events**: typed helpers built on `Client::request`
//!   and `Client::subscribe`, with no connection logic of their own
//!
//! ## Session
//!
//! ```text
//! client                                   hub
//!   │ ──────────── WebSocket upgrade ────────▶ │
//!   │ ◀─────────── auth_required ───────────── │
//!   │ ──────────── auth {access_token} ──────▶ │
//!   │ ◀─────────── auth_ok ─────────────────── │
//!   │ ──────────── {id:1, subscribe_events} ─▶ │   (replay)
//!   │ ◀─────────── {id:1, result} ──────────── │
//!   │ ◀─────────── {id:1, event} ───────────── │
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod services;
pub mod state_events;

pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{HubError, Result};
pub use hub::{AuthState, Client, Command, EventData, EventHandler, RawCommand};
pub use services::{CallService, CallServiceTarget, GetStates, State};
pub use state_events::{StateChangeEvent, StateChangeRouter};
