//! In-process hub for integration tests.
//!
//! Speaks just enough of the hub protocol to drive the client: sends
//! `auth_required` on every connection, answers `auth` according to the
//! configured mode, and replies to every other command through a
//! replaceable responder. Tests can push events and drop the live
//! connection.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use hubsocket::ClientConfig;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const TOKEN: &str = "test-token";

/// How the hub answers the credential message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Accept,
    Reject,
    /// Never answer
    Silent,
}

/// Frames to send back for one received command.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// A frame the hub received, tagged with the connection it arrived on (1-based).
#[derive(Debug, Clone)]
pub struct Received {
    pub conn: usize,
    pub frame: Value,
}

impl Received {
    pub fn kind(&self) -> &str {
        self.frame["type"].as_str().unwrap_or_default()
    }

    pub fn id(&self) -> Option<u64> {
        self.frame["id"].as_u64()
    }
}

enum Control {
    Send(String),
    Drop,
}

struct HubState {
    auth: Mutex<AuthMode>,
    responder: Mutex<Responder>,
    received: Mutex<Vec<Received>>,
    connections: AtomicUsize,
    live: Mutex<Option<mpsc::UnboundedSender<Control>>>,
}

pub struct MockHub {
    addr: SocketAddr,
    state: Arc<HubState>,
    accept_task: JoinHandle<()>,
}

/// `{"id", "type": "result", "success": true, "result"}`
pub fn ok(id: u64, result: Value) -> Value {
    json!({"id": id, "type": "result", "success": true, "result": result})
}

pub fn err(id: u64, code: &str, message: &str) -> Value {
    json!({"id": id, "type": "result", "success": false, "error": {"code": code, "message": message}})
}

fn default_responder() -> Responder {
    Arc::new(|frame: &Value| match frame["id"].as_u64() {
        Some(id) => vec![ok(id, Value::Null)],
        None => Vec::new(),
    })
}

impl MockHub {
    pub async fn start(auth: AuthMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(HubState {
            auth: Mutex::new(auth),
            responder: Mutex::new(default_responder()),
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            live: Mutex::new(None),
        });

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn = accept_state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(serve(Arc::clone(&accept_state), stream, conn));
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/api/websocket", self.addr)
    }

    /// Client config pointed at this hub with short test timings.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            url: self.url(),
            token: TOKEN.to_string(),
            reconnect_backoff_ms: 100,
            auth_timeout_ms: 1000,
            handshake_timeout_ms: 1000,
            ..Default::default()
        }
    }

    pub fn set_auth(&self, auth: AuthMode) {
        *self.state.auth.lock().unwrap() = auth;
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&Value) -> Vec<Value> + Send + Sync + 'static,
    {
        *self.state.responder.lock().unwrap() = Arc::new(responder);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }

    /// Received frames of one command type, in arrival order.
    pub fn received_of(&self, kind: &str) -> Vec<Received> {
        self.received().into_iter().filter(|r| r.kind() == kind).collect()
    }

    /// Event types subscribed on connection `conn`, in order.
    pub fn subscriptions_on(&self, conn: usize) -> Vec<String> {
        self.received_of("subscribe_events")
            .into_iter()
            .filter(|r| r.conn == conn)
            .filter_map(|r| r.frame["event_type"].as_str().map(str::to_string))
            .collect()
    }

    /// Push a raw frame on the live connection.
    pub fn send(&self, frame: Value) {
        if let Some(tx) = self.state.live.lock().unwrap().as_ref() {
            let _ = tx.send(Control::Send(frame.to_string()));
        }
    }

    pub fn push_event(&self, event_type: &str, data: Value) {
        self.send(json!({
            "id": 1,
            "type": "event",
            "event": {"event_type": event_type, "data": data, "origin": "LOCAL"}
        }));
    }

    /// Drop the live connection without a close handshake.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state.live.lock().unwrap().take() {
            let _ = tx.send(Control::Drop);
        }
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connection();
    }
}

async fn serve(state: Arc<HubState>, stream: TcpStream, conn: usize) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();

    let (tx, mut control) = mpsc::unbounded_channel();
    *state.live.lock().unwrap() = Some(tx);

    let required = json!({"type": "auth_required", "ha_version": "2024.1.0"}).to_string();
    if sink.send(Message::Text(required)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            command = control.recv() => match command {
                Some(Control::Send(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Some(Control::Drop) | None => return,
            },
            incoming = source.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                state.received.lock().unwrap().push(Received {
                    conn,
                    frame: frame.clone(),
                });

                let replies = if frame["type"] == "auth" {
                    let mode = *state.auth.lock().unwrap();
                    match mode {
                        AuthMode::Accept if frame["access_token"] == TOKEN => {
                            vec![json!({"type": "auth_ok", "ha_version": "2024.1.0"})]
                        }
                        AuthMode::Silent => Vec::new(),
                        _ => vec![json!({"type": "auth_invalid", "message": "Invalid password"})],
                    }
                } else {
                    let responder = Arc::clone(&*state.responder.lock().unwrap());
                    responder(&frame)
                };

                for reply in replies {
                    if sink.send(Message::Text(reply.to_string())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Poll `condition` until it holds or three seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
