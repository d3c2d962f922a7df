//! Push-event handlers
//!
//! Unsolicited frames are turned into [`Event`]s and delivered to every
//! handler registered for the event's [`EventKind`], optionally gated by an
//! [`EventFilter`]. Handlers run as independent tasks; an error returned by
//! one is logged and never reaches the receive loop.

use crate::protocol::Frame;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

/// Event category a handler subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// New message (`NOTIF_MESSAGE`)
    Message,
    /// Message with status `EDITED`
    MessageEdit,
    /// Message with status `REMOVED`
    MessageDelete,
    /// Reaction counters changed on a message
    ReactionChange,
    /// Chat metadata changed
    ChatUpdate,
    /// Every unsolicited frame, whatever its opcode
    Raw,
}

/// One push event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub frame: Frame,
}

impl Event {
    pub fn new(kind: EventKind, frame: Frame) -> Self {
        Self { kind, frame }
    }

    #[inline]
    pub fn opcode(&self) -> u16 {
        self.frame.opcode
    }

    #[inline]
    pub fn payload(&self) -> &Value {
        &self.frame.payload
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.payload().get("chatId").and_then(Value::as_i64)
    }

    /// The `message` object of a message event
    pub fn message(&self) -> Option<&Value> {
        self.payload().get("message")
    }

    pub fn message_id(&self) -> Option<String> {
        let id = match self.message() {
            Some(message) => message.get("id"),
            None => self.payload().get("messageId"),
        }?;
        match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.message()?.get("text").and_then(Value::as_str)
    }

    pub fn sender(&self) -> Option<i64> {
        self.message()?.get("sender").and_then(Value::as_i64)
    }

    /// `EDITED`, `REMOVED` or absent for a fresh message
    pub fn status(&self) -> Option<&str> {
        self.message()?.get("status").and_then(Value::as_str)
    }
}

/// Asynchronous push-event handler
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: Event) -> Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`]
pub struct FnHandler<F>(F);

/// Wrap `f` as an [`EventHandler`]
///
/// # Example
/// ```ignore
/// client.on_message(handler_fn(|event: Event| async move {
///     tracing::info!(text = ?event.text(), "message");
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> Result<()> {
        (self.0)(event).await
    }
}

/// Predicate deciding whether a handler sees an event
///
/// Any `Fn(&Event) -> bool` is a filter.
pub trait EventFilter: Send + Sync + 'static {
    fn matches(&self, event: &Event) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&Event) -> bool + Send + Sync + 'static,
{
    fn matches(&self, event: &Event) -> bool {
        self(event)
    }
}
