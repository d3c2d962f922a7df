//! # maxwire traits
//!
//! The seams of the connection core:
//!
//! - **Transport**: frame-level connection (WebSocket or raw TLS socket)
//! - **CredentialStore**: device id and session token persistence
//! - **RequestSender**: narrow request/response interface for services
//! - **ReconnectionStrategy**: delay policy between reconnect attempts
//! - **EventHandler / EventFilter**: push-event subscribers
//! - **CodeProvider**: verification code source for the login flow

pub mod code;
pub mod error;
pub mod handler;
pub mod reconnect;
pub mod sender;
pub mod storage;
pub mod transport;

pub use code::{CodeProvider, StaticCode, StdinCodeProvider};
pub use error::{ErrorClass, MaxWireError, Result};
pub use handler::{handler_fn, Event, EventFilter, EventHandler, EventKind, FnHandler};
pub use reconnect::{ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionStrategy};
pub use sender::RequestSender;
pub use storage::CredentialStore;
pub use transport::{Transport, TransportKind};
