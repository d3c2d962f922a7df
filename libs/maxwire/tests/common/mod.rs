//! Common test utilities for maxwire integration tests
//!
//! - [`MockTransport`]: in-memory transport answering through a scripted
//!   [`Responder`], with injectable pushes, disconnects and connect failures
//! - [`MockWsServer`]: plain `ws://` server speaking the JSON frame protocol

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use maxwire::protocol::{opcode, Frame, JsonCodec};
use maxwire::{MaxWireError, Result, Transport, TransportKind};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Maps a request frame to the frames the server sends back
pub type Responder = Arc<dyn Fn(&Frame) -> Vec<Frame> + Send + Sync>;

/// Response frame for `request`
pub fn reply(request: &Frame, payload: Value) -> Frame {
    Frame::new(request.ver, 1, request.seq, request.opcode, payload)
}

/// Unsolicited frame
pub fn push(opcode: u16, payload: Value) -> Frame {
    Frame::new(11, 0, 9_999, opcode, payload)
}

/// Sync payload with one dialog, one chat and one channel
pub fn sync_payload() -> Value {
    json!({
        "chats": [
            {"id": 100, "type": "DIALOG"},
            {"id": -200, "type": "CHAT"},
            {"id": -300, "type": "CHANNEL"}
        ],
        "profile": {"contact": {"id": 42, "names": [{"name": "Test"}]}}
    })
}

/// Well-behaved server: handshake, login flow, sync and ping all succeed
pub fn happy_server() -> Responder {
    server_with(|_| None)
}

/// Like [`happy_server`], but `overrides` may answer any request first
pub fn server_with<F>(overrides: F) -> Responder
where
    F: Fn(&Frame) -> Option<Vec<Frame>> + Send + Sync + 'static,
{
    Arc::new(move |request: &Frame| {
        if let Some(frames) = overrides(request) {
            return frames;
        }
        let payload = match request.opcode {
            opcode::AUTH_REQUEST => json!({"token": "temp-token"}),
            opcode::AUTH => json!({"tokenAttrs": {"LOGIN": {"token": "fresh-token"}}}),
            opcode::LOGIN => sync_payload(),
            _ => json!({}),
        };
        vec![reply(request, payload)]
    })
}

/// Server that never answers
pub fn silent_server() -> Responder {
    Arc::new(|_: &Frame| Vec::new())
}

/// Scripted in-memory transport
pub struct MockTransport {
    kind: TransportKind,
    responder: Responder,
    fail_connects: AtomicUsize,
    connect_attempts: AtomicUsize,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    inbound_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    sent: Mutex<Vec<Frame>>,
}

impl MockTransport {
    pub fn new(responder: Responder) -> Arc<Self> {
        Self::failing(responder, 0)
    }

    /// The first `fail_connects` connect attempts fail
    pub fn failing(responder: Responder, fail_connects: usize) -> Arc<Self> {
        Arc::new(Self {
            kind: TransportKind::Websocket,
            responder,
            fail_connects: AtomicUsize::new(fail_connects),
            connect_attempts: AtomicUsize::new(0),
            inbound_tx: Mutex::new(None),
            inbound_rx: tokio::sync::Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Every frame the client sent, across connections
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    pub fn sent_opcodes(&self) -> Vec<u16> {
        self.sent.lock().iter().map(|f| f.opcode).collect()
    }

    /// Deliver a frame as if the server sent it
    pub fn push(&self, frame: Frame) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(frame);
        }
    }

    /// Simulate the server dropping the connection
    pub fn drop_connection(&self) {
        self.inbound_tx.lock().take();
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(MaxWireError::HandshakeFailed("scripted connect failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound_tx.lock() = Some(tx);
        *self.inbound_rx.lock().await = Some(rx);
        Ok(())
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let tx = self
            .inbound_tx
            .lock()
            .clone()
            .ok_or(MaxWireError::NotConnected)?;
        self.sent.lock().push(frame.clone());
        for response in (self.responder)(frame) {
            let _ = tx.send(response);
        }
        Ok(())
    }

    async fn receive_frame(&self) -> Result<Frame> {
        let mut guard = self.inbound_rx.lock().await;
        let rx = guard.as_mut().ok_or(MaxWireError::NotConnected)?;
        rx.recv()
            .await
            .ok_or_else(|| MaxWireError::ConnectionClosed("mock connection dropped".into()))
    }

    async fn close(&self) -> Result<()> {
        self.inbound_tx.lock().take();
        if let Ok(mut rx) = self.inbound_rx.try_lock() {
            rx.take();
        }
        Ok(())
    }
}

/// Poll `cond` every 10ms until it holds or `limit` passes
pub async fn wait_until(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// A mock WebSocket server speaking the JSON frame protocol
///
/// Answers every request with an empty payload, except `LOGIN` which gets
/// [`sync_payload`]. Right after answering `LOGIN` it pushes one text
/// message notification.
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let shutdown = shutdown_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, shutdown).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self { addr, shutdown }
    }

    async fn handle_connection(stream: tokio::net::TcpStream, shutdown: Arc<Notify>) {
        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => continue,
                    };
                    let Ok(request) = JsonCodec::decode(&text) else {
                        continue;
                    };
                    let payload = if request.opcode == opcode::LOGIN {
                        sync_payload()
                    } else {
                        json!({})
                    };
                    let mut outgoing = vec![reply(&request, payload)];
                    if request.opcode == opcode::LOGIN {
                        outgoing.push(push(
                            opcode::NOTIF_MESSAGE,
                            json!({"chatId": 100, "message": {"id": "m1", "sender": 7, "text": "hello"}}),
                        ));
                    }
                    for frame in outgoing {
                        let Ok(text) = JsonCodec::encode(&frame) else {
                            continue;
                        };
                        if write.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    /// Get the WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Test fixtures
pub mod fixtures {
    use maxwire::ClientConfig;

    /// Config with a token, fast timeouts and reconnect on
    pub fn token_config() -> ClientConfig {
        ClientConfig {
            token: Some("provided-token".into()),
            request_timeout_secs: 2.0,
            ..Default::default()
        }
    }

    pub fn phone_config() -> ClientConfig {
        ClientConfig {
            phone: Some("+79991234567".into()),
            request_timeout_secs: 2.0,
            ..Default::default()
        }
    }
}
