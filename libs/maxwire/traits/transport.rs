use crate::protocol::{Frame, SequenceWidth, SOCKET_PROTOCOL_VERSION, WS_PROTOCOL_VERSION};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which wire the client talks over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Message-oriented: one JSON object per WebSocket text message
    #[default]
    Websocket,
    /// Byte-stream: raw TLS socket with a packed binary header
    Socket,
}

impl TransportKind {
    /// Width of the sequence field this transport can carry
    pub fn sequence_width(self) -> SequenceWidth {
        match self {
            TransportKind::Websocket => SequenceWidth::Unbounded,
            TransportKind::Socket => SequenceWidth::OneByte,
        }
    }

    /// Header `ver` the server expects on this transport
    pub fn default_version(self) -> u8 {
        match self {
            TransportKind::Websocket => WS_PROTOCOL_VERSION,
            TransportKind::Socket => SOCKET_PROTOCOL_VERSION,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Websocket => f.write_str("websocket"),
            TransportKind::Socket => f.write_str("socket"),
        }
    }
}

/// Frame-level connection to the server
///
/// Implementations own the underlying socket and guard it internally, so a
/// single `Arc<dyn Transport>` is shared between the receive loop (the only
/// reader) and every sender. The write path is serialised per frame and
/// never held across an await for a response.
///
/// # Contract
/// - `connect` replaces any previous connection
/// - `receive_frame` returns one decoded frame; a list payload is returned
///   as-is and fanned out by the caller
/// - `receive_frame` errors with `Decode` for a frame that can be skipped
///   and with a transport-fatal error when the stream is gone
/// - `close` is idempotent
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Which wire this is
    fn kind(&self) -> TransportKind;

    /// Open the connection (proxy, TLS and upgrade included)
    async fn connect(&self) -> Result<()>;

    /// Encode and write one frame
    async fn send_frame(&self, frame: &Frame) -> Result<()>;

    /// Read and decode the next frame
    async fn receive_frame(&self) -> Result<Frame>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}
