//! Error types for hubsocket

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    /// A command other than the auth message was attempted before the
    /// current connection authenticated. Nothing was written.
    #[error("tried to send command {kind} prior to auth")]
    NotAuthenticated { kind: String },

    /// The client was closed explicitly, or a failure occurred with
    /// reconnection disabled.
    #[error("client is closed")]
    Closed,

    #[error("[{code}] {message}")]
    Protocol { code: String, message: String },

    #[error("unknown error response from hub")]
    UnknownFailure,

    #[error("failed to decode result: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("auth timeout")]
    AuthTimeout,

    #[error("authentication superseded by a newer connection")]
    AuthSuperseded,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The connection generation carrying a request was torn down before
    /// its result arrived. The request is not retried.
    #[error("connection lost before a result arrived")]
    ConnectionLost,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// Whether the error came from the connection itself (auth or
    /// transport) rather than from the request. Callers may retry these
    /// once the client has reconnected.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            HubError::AuthRejected(_)
                | HubError::AuthTimeout
                | HubError::AuthSuperseded
                | HubError::Connect(_)
                | HubError::Transport(_)
                | HubError::ConnectionLost
        )
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
