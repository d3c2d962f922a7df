//! # maxwire core
//!
//! The connection engine: dispatcher, receive loop, outgoing queue, session
//! lifecycle and the [`MaxClient`] facade tying them together.
//!
//! ## Example
//!
//! ```rust,ignore
//! use maxwire::{handler_fn, ClientConfig, Event};
//!
//! #[tokio::main]
//! async fn main() -> maxwire::Result<()> {
//!     let config = ClientConfig::load("config/client.yaml")?;
//!     let client = maxwire::builder().config(config).build()?;
//!
//!     client.on_message(handler_fn(|event: Event| async move {
//!         tracing::info!(chat = ?event.chat_id(), text = ?event.text(), "message");
//!         Ok(())
//!     }));
//!
//!     // Blocks until closed or a fatal error
//!     client.start().await
//! }
//! ```

pub mod auth;
pub mod builder;
pub mod client;
pub mod config;
pub mod connection_state;
pub mod dispatcher;
pub mod events;
pub mod heartbeat;
pub mod outgoing;
pub mod receive_loop;
pub mod scheduler;
pub mod session;
pub mod tasks;

// Re-export main types
pub use auth::{AuthService, Registration, SyncSnapshot};
pub use builder::{states, MaxClientBuilder};
pub use client::MaxClient;
pub use config::{ClientConfig, ConfigError, OutgoingConfig, UserAgent};
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, MetricsSnapshot};
pub use dispatcher::{Dispatcher, Resolution};
pub use events::{categorize, EventBus};
pub use outgoing::{CircuitBreaker, OutgoingEnvelope, OutgoingQueue, OutgoingWorker};
pub use session::ClientEvent;
pub use tasks::TaskSupervisor;

/// Start building a [`MaxClient`]
///
/// # Example
/// ```ignore
/// let client = maxwire::builder()
///     .config(ClientConfig::load("config/client.yaml")?)
///     .code_provider(StdinCodeProvider)
///     .build()?;
/// ```
pub fn builder() -> MaxClientBuilder<builder::states::NoConfig> {
    MaxClientBuilder::new()
}
