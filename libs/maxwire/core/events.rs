//! Push-event fan-out
//!
//! # Architecture
//!
//! ```text
//! Receive loop → unsolicited Frame → EventBus::publish
//!                                        ├─ incoming queue (opt-in, bounded, try_send)
//!                                        └─ categorize → [kinds] → handler tasks
//!                                                                  (one per registration, spawned
//!                                                                   in registration order; the
//!                                                                   filter runs inside the task)
//! ```
//!
//! `publish` never awaits: a slow consumer loses events (counted and
//! logged) instead of stalling the receive loop.

use super::connection_state::AtomicMetrics;
use super::tasks::TaskSupervisor;
use crate::protocol::{opcode, Frame};
use crate::traits::{Event, EventFilter, EventHandler, EventKind, Result};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Callback run once the session reaches `Running`
pub type StartCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn EventHandler>,
    filter: Option<Arc<dyn EventFilter>>,
}

pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    on_start: RwLock<Vec<StartCallback>>,
    incoming: Mutex<Option<mpsc::Sender<Frame>>>,
    capacity: usize,
    tasks: Arc<TaskSupervisor>,
    metrics: Arc<AtomicMetrics>,
}

/// Event kinds an unsolicited frame maps to, in dispatch order
///
/// A message carrying status `EDITED`/`REMOVED` goes to the edit/delete
/// handlers first and then to the plain message handlers. Every frame ends
/// with `Raw`.
pub fn categorize(frame: &Frame) -> Vec<EventKind> {
    let mut kinds = Vec::with_capacity(3);
    match frame.opcode {
        opcode::NOTIF_MESSAGE => {
            let status = frame
                .payload
                .get("message")
                .and_then(|m| m.get("status"))
                .and_then(|s| s.as_str());
            match status {
                Some("EDITED") => kinds.push(EventKind::MessageEdit),
                Some("REMOVED") => kinds.push(EventKind::MessageDelete),
                _ => {}
            }
            kinds.push(EventKind::Message);
        }
        opcode::NOTIF_MSG_REACTIONS_CHANGED => kinds.push(EventKind::ReactionChange),
        opcode::NOTIF_CHAT => kinds.push(EventKind::ChatUpdate),
        _ => {}
    }
    kinds.push(EventKind::Raw);
    kinds
}

impl EventBus {
    pub fn new(capacity: usize, tasks: Arc<TaskSupervisor>, metrics: Arc<AtomicMetrics>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            on_start: RwLock::new(Vec::new()),
            incoming: Mutex::new(None),
            capacity,
            tasks,
            metrics,
        }
    }

    /// Register a handler for `kind`
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
        filter: Option<Arc<dyn EventFilter>>,
    ) {
        debug!("Handler registered for {:?} (filtered: {})", kind, filter.is_some());
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration { handler, filter });
    }

    pub fn on_start(&self, callback: StartCallback) {
        self.on_start.write().push(callback);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Enable the bounded inbound queue and return its receiving end
    ///
    /// Calling this again replaces the previous receiver.
    pub fn incoming_stream(&self) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        *self.incoming.lock() = Some(tx);
        rx
    }

    /// Fan an unsolicited frame out to the queue and the handlers
    pub fn publish(&self, frame: Frame) {
        self.offer_incoming(&frame);

        let kinds = categorize(&frame);
        let handlers = self.handlers.read();
        for kind in kinds {
            let Some(registrations) = handlers.get(&kind) else {
                continue;
            };
            let event = Event::new(kind, frame.clone());
            for registration in registrations {
                let Registration { handler, filter } = registration.clone();
                let event = event.clone();
                // Filters are user code too; a panic must stay inside the task
                self.tasks.spawn("event_handler", async move {
                    if filter.map_or(true, |f| f.matches(&event)) {
                        handler.handle(event).await
                    } else {
                        Ok(())
                    }
                });
            }
        }
    }

    fn offer_incoming(&self, frame: &Frame) {
        let mut incoming = self.incoming.lock();
        let Some(tx) = incoming.as_ref() else {
            return;
        };
        match tx.try_send(frame.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                self.metrics.increment_dropped_events();
                warn!(
                    "Incoming queue full; dropping frame opcode={} seq={}",
                    dropped.opcode, dropped.seq
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Incoming stream receiver dropped, disabling queue");
                *incoming = None;
            }
        }
    }

    /// Run the start callbacks in registration order
    pub async fn run_on_start(&self) {
        let callbacks: Vec<StartCallback> = self.on_start.read().clone();
        for callback in callbacks {
            if let Err(e) = callback().await {
                warn!("on_start callback failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::handler_fn;
    use futures::FutureExt;
    use serde_json::json;
    use std::time::Duration;
    use tracing::Span;

    fn bus(capacity: usize) -> (EventBus, Arc<AtomicMetrics>) {
        let metrics = Arc::new(AtomicMetrics::new());
        let tasks = Arc::new(TaskSupervisor::new(Span::none()));
        (EventBus::new(capacity, tasks, metrics.clone()), metrics)
    }

    fn message(status: Option<&str>) -> Frame {
        let mut msg = json!({"id": "1", "text": "hi"});
        if let Some(s) = status {
            msg["status"] = json!(s);
        }
        Frame::new(11, 0, 77, opcode::NOTIF_MESSAGE, json!({"chatId": 5, "message": msg}))
    }

    #[test]
    fn test_categorize() {
        assert_eq!(categorize(&message(None)), vec![EventKind::Message, EventKind::Raw]);
        assert_eq!(
            categorize(&message(Some("EDITED"))),
            vec![EventKind::MessageEdit, EventKind::Message, EventKind::Raw]
        );
        assert_eq!(
            categorize(&message(Some("REMOVED"))),
            vec![EventKind::MessageDelete, EventKind::Message, EventKind::Raw]
        );
        let reaction = Frame::new(11, 0, 1, opcode::NOTIF_MSG_REACTIONS_CHANGED, json!({}));
        assert_eq!(categorize(&reaction), vec![EventKind::ReactionChange, EventKind::Raw]);
        let other = Frame::new(11, 0, 1, 999, json!({}));
        assert_eq!(categorize(&other), vec![EventKind::Raw]);
    }

    #[tokio::test]
    async fn test_handlers_and_filters() {
        let (bus, _) = bus(8);
        let (tx, mut rx) = mpsc::unbounded_channel::<(EventKind, String)>();

        for tag in ["first", "second"] {
            let tx = tx.clone();
            bus.subscribe(
                EventKind::Message,
                Arc::new(handler_fn(move |event: Event| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send((event.kind, tag.to_string()));
                        Ok::<(), crate::MaxWireError>(())
                    }
                })),
                None,
            );
        }
        let edit_tx = tx.clone();
        bus.subscribe(
            EventKind::MessageEdit,
            Arc::new(handler_fn(move |event: Event| {
                let tx = edit_tx.clone();
                async move {
                    let _ = tx.send((event.kind, "edit".to_string()));
                    Ok::<(), crate::MaxWireError>(())
                }
            })),
            Some(Arc::new(|e: &Event| e.chat_id() == Some(999))),
        );

        bus.publish(message(Some("EDITED")));

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap());
        }
        seen.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            seen,
            vec![
                (EventKind::Message, "first".to_string()),
                (EventKind::Message, "second".to_string())
            ]
        );
        // The edit handler's filter rejected chat 5
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_panicking_filter_is_contained() {
        let (bus, _) = bus(8);
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let bad_tx = tx.clone();
        bus.subscribe(
            EventKind::Message,
            Arc::new(handler_fn(move |_event: Event| {
                let tx = bad_tx.clone();
                async move {
                    let _ = tx.send("unreachable".to_string());
                    Ok::<(), crate::MaxWireError>(())
                }
            })),
            Some(Arc::new(|_: &Event| -> bool { panic!("filter bug") })),
        );
        bus.subscribe(
            EventKind::Message,
            Arc::new(handler_fn(move |event: Event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event.text().unwrap_or_default().to_string());
                    Ok::<(), crate::MaxWireError>(())
                }
            })),
            None,
        );

        // Returns normally even though a filter panics
        bus.publish(message(None));
        bus.publish(message(None));

        for _ in 0..2 {
            let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
            assert_eq!(seen.as_deref(), Some("hi"));
        }
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_incoming_queue_drops_when_full() {
        let (bus, metrics) = bus(2);
        let mut rx = bus.incoming_stream();
        for _ in 0..5 {
            bus.publish(message(None));
        }
        assert_eq!(metrics.snapshot().dropped_events, 3);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_callbacks_in_order() {
        let (bus, _) = bus(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.on_start(Arc::new(move || {
                let order = order.clone();
                async move {
                    order.lock().push(i);
                    Ok::<(), crate::MaxWireError>(())
                }
                .boxed()
            }));
        }
        bus.run_on_start().await;
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
