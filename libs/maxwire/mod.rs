//! # maxwire
//!
//! Connection core of a Max messenger client.
//!
//! ## Features
//!
//! - **Two transports**: JSON over WebSocket, binary MessagePack/LZ4 frames
//!   over a raw TLS socket, both optionally through SOCKS5
//! - **Sequence-correlated requests**: `send_and_wait` with per-request
//!   deadlines; everything else is a push event
//! - **Session lifecycle**: handshake, login or registration, initial sync,
//!   keep-alive, and reconnect with backoff
//! - **Best-effort outgoing queue**: per-error-class retries behind a
//!   circuit breaker
//! - **Push events**: filtered async handlers per category plus an opt-in
//!   bounded stream

pub mod core;
pub mod protocol;
pub mod storage;
pub mod traits;
pub mod transport;

// Re-export all traits
pub use traits::*;

// Re-export core client functionality
pub use self::core::{
    builder,
    builder::{states, MaxClientBuilder},
    client::MaxClient,
    config::ClientConfig,
    connection_state::{ConnectionState, MetricsSnapshot},
    session::ClientEvent,
};
pub use protocol::{opcode, Frame};
pub use storage::{FileStore, MemoryStore};
