//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to a WebSocket and send/receive text frames.
//! No knowledge of the hub protocol, authentication, or reconnection.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
        protocol::Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::HubError;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Dial `url` and complete the WebSocket upgrade within `handshake_timeout`.
///
/// `headers` are added to the upgrade request on top of the handshake headers.
pub async fn connect(
    url: &str,
    headers: &BTreeMap<String, String>,
    handshake_timeout: Duration,
) -> Result<(WsSink, WsStream), HubError> {
    debug!(url = %url, "Connecting to WebSocket");

    let mut request = url
        .into_client_request()
        .map_err(|e| HubError::Connect(format!("Failed to build request: {}", e)))?;

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HubError::Connect(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HubError::Connect(format!("Invalid header value for {}: {}", name, e)))?;
        request.headers_mut().insert(name, value);
    }

    let (ws, _) = tokio::time::timeout(handshake_timeout, connect_async(request))
        .await
        .map_err(|_| HubError::Connect(format!("Handshake timed out after {:?}", handshake_timeout)))?
        .map_err(|e| HubError::Connect(format!("WebSocket connect failed: {}", e)))?;

    debug!(url = %url, "WebSocket connected");
    Ok(ws.split())
}

/// Send one text frame.
pub async fn send_text(sink: &mut WsSink, text: String) -> Result<(), HubError> {
    sink.send(Message::Text(text))
        .await
        .map_err(|e| HubError::Transport(format!("Failed to send: {}", e)))
}

/// Receive the next text frame.
///
/// Returns None if the connection is closed.
/// Skips control frames (ping/pong handled automatically).
pub async fn recv_text(stream: &mut WsStream) -> Result<Option<String>, HubError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text)),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => return Ok(Some(text)),
                Err(_) => {
                    debug!("Skipping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                debug!(frame = ?frame, "Peer closed connection");
                return Ok(None);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(HubError::Transport(format!("WebSocket error: {}", e))),
            None => return Ok(None),
        }
    }
}

/// Close the send half, ignoring errors from an already-dead socket.
pub async fn close(sink: &mut WsSink) {
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Close on dead socket");
    }
}
