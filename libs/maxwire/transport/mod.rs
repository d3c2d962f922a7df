//! Transports
//!
//! - [`WebSocketTransport`]: JSON frames over a WebSocket (TLS via `wss://`)
//! - [`SocketTransport`]: binary frames over a raw TLS socket
//!
//! Both dial through [`net::connect_tcp`], which handles the optional SOCKS5
//! hop and socket keep-alive.

pub mod net;
pub mod proxy;
pub mod socket;
pub mod socks5;
pub mod tls;
pub mod websocket;

pub use proxy::ProxyConfig;
pub use socket::SocketTransport;
pub use websocket::WebSocketTransport;

use crate::core::config::ClientConfig;
use crate::traits::{Result, Transport, TransportKind};
use std::sync::Arc;

/// Build the transport selected by `config.transport`
pub fn from_config(config: &ClientConfig) -> Result<Arc<dyn Transport>> {
    Ok(match config.transport {
        TransportKind::Websocket => Arc::new(WebSocketTransport::from_config(config)?),
        TransportKind::Socket => Arc::new(SocketTransport::from_config(config)?),
    })
}
