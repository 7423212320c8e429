//! Hub Connection Module
//!
//! A resilient client for the hub's authenticated, multiplexed WebSocket API.
//!
//! # Architecture
//!
//! The module is organized by concern, with each submodule having a single responsibility:
//!
//! | Module          | Responsibility                                        |
//! |-----------------|-------------------------------------------------------|
//! | `transport`     | WebSocket connect/send/receive                        |
//! | `protocol`      | JSON commands and envelopes                           |
//! | `connection`    | Socket ownership, write path, the read loop           |
//! | `auth`          | Handshake state, deadline, waking `wait_auth` callers |
//! | `correlator`    | Request IDs and routing each result to its caller     |
//! | `subscriptions` | Event handlers, dispatch, replay after reconnect      |
//! | `supervisor`    | Failure handling and the reconnect loop               |
//! | `client`        | The public handle                                     |
//!
//! # Data flow
//!
//! ```text
//! caller ──▶ Client ──▶ correlator / registry ──▶ write path ──▶ socket
//! socket ──▶ read loop ──┬─ result ──────────▶ correlator ──▶ caller
//!                        ├─ event ───────────▶ registry ───▶ handler task
//!                        └─ auth_* ──────────▶ auth gate
//! failures ──▶ supervisor ──▶ teardown ──backoff──▶ open ──▶ replay
//! ```
//!
//! # Key Design Principles
//!
//! ## 1. Connections Have Generations
//!
//! Each open is numbered. Anything that can outlive its connection (read
//! loop, auth deadline, replay, pending request) carries that number, so
//! a stale one can tell it has been superseded instead of racing the new
//! connection.
//!
//! ## 2. One Reader, One Writer
//!
//! - Exactly one read loop per generation, and teardown waits for it
//! - All writes go through one lock, which also assigns request IDs
//!
//! ## 3. Nobody Waits Forever On A Dead Connection
//!
//! - Pending requests of a torn-down generation fail with `ConnectionLost`
//! - `wait_auth` callers are released with the outcome of the generation
//!   they waited on

// Internal modules - not exposed publicly
mod auth;
mod connection;
mod correlator;
mod subscriptions;
mod supervisor;
mod transport;

// Public modules
mod client;
pub mod protocol;

// Re-export the public API
pub use auth::AuthState;
pub use client::Client;
pub use protocol::{Command, EventData, RawCommand, SubscribeEvents};
pub use subscriptions::EventHandler;
