use super::config::ClientConfig;
use super::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, MetricsSnapshot};
use super::dispatcher::Dispatcher;
use super::events::{EventBus, StartCallback};
use super::outgoing::OutgoingEnvelope;
use super::scheduler::ScheduledJob;
use super::session::{ClientEvent, JobRegistration, Session};
use super::tasks::TaskSupervisor;
use crate::protocol::{Frame, CMD_REQUEST};
use crate::traits::*;
use crossbeam_channel::{unbounded, Receiver};
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, Span};

/// Max messenger client
///
/// Built with [`crate::builder`]. `start` drives the session until it is
/// stopped; every other method can be called concurrently from other tasks
/// through a shared reference.
///
/// ```ignore
/// let client = Arc::new(maxwire::builder().config(config).build()?);
/// client.on_message(handler_fn(|event: Event| async move {
///     println!("{:?}", event.text());
///     Ok(())
/// }));
/// client.start().await?;
/// ```
pub struct MaxClient {
    session: Arc<Session>,
    handler_tasks: Arc<TaskSupervisor>,
    event_rx: Receiver<ClientEvent>,
}

impl MaxClient {
    pub(crate) fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        codes: Arc<dyn CodeProvider>,
        strategy: Box<dyn ReconnectionStrategy>,
        shutdown_flag: Arc<AtomicBool>,
        span: Span,
    ) -> Self {
        let config = Arc::new(config);
        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Idle));
        let metrics = Arc::new(AtomicMetrics::new());
        let handler_tasks = Arc::new(TaskSupervisor::new(span.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            state.clone(),
            metrics.clone(),
            config.version(),
        ));
        let events = Arc::new(EventBus::new(
            config.incoming_queue_capacity,
            handler_tasks.clone(),
            metrics.clone(),
        ));
        let (event_tx, event_rx) = unbounded();

        let session = Arc::new(Session::new(
            config,
            dispatcher,
            events,
            state,
            metrics,
            store,
            codes,
            strategy,
            shutdown_flag,
            event_tx,
            span,
        ));

        Self {
            session,
            handler_tasks,
            event_rx,
        }
    }

    /// Run the session until it stops
    ///
    /// Transient failures are retried according to the reconnection
    /// strategy. Returns `Ok(())` after [`MaxClient::close`] (or the shutdown
    /// flag), otherwise the error that ended the session.
    pub async fn start(&self) -> Result<()> {
        self.session.run().await
    }

    /// Stop the session and cancel in-flight event handlers
    ///
    /// Waits for a concurrent `start` to return, so pending requests have
    /// already failed with `NotConnected` when this resolves. The client can
    /// be started again afterwards.
    pub async fn close(&self) {
        info!(parent: &self.session.span, "Closing client");
        self.session.stop().await;
        self.handler_tasks.shutdown().await;
        if !self.session.state.get().is_active() {
            self.session.state.set(ConnectionState::Stopped);
        }
    }

    /// Send a request and return the response payload
    ///
    /// A response carrying an `error` field becomes `MaxWireError::Server`.
    pub async fn send_request(&self, opcode: u16, payload: Value) -> Result<Value> {
        self.session
            .dispatcher
            .send_and_wait(opcode, payload, CMD_REQUEST, self.session.config.request_timeout())
            .await?
            .into_result()
    }

    /// Send a request with explicit `cmd` and deadline, returning the raw frame
    pub async fn send_request_with(
        &self,
        opcode: u16,
        payload: Value,
        cmd: u16,
        timeout: Duration,
    ) -> Result<Frame> {
        self.session
            .dispatcher
            .send_and_wait(opcode, payload, cmd, timeout)
            .await
    }

    pub async fn send_fire_and_forget(&self, opcode: u16, payload: Value) -> Result<()> {
        self.session
            .dispatcher
            .send_fire_and_forget(opcode, payload, CMD_REQUEST)
            .await
    }

    /// Queue a request for best-effort delivery with retries
    ///
    /// Works while disconnected; the queue drains once the session is running.
    pub fn enqueue(&self, opcode: u16, payload: Value) -> Result<()> {
        let retries = self.session.outgoing.default_max_retries();
        self.enqueue_with_retries(opcode, payload, retries)
    }

    pub fn enqueue_with_retries(&self, opcode: u16, payload: Value, max_retries: u32) -> Result<()> {
        let timeout = self.session.config.request_timeout();
        self.enqueue_with(opcode, payload, CMD_REQUEST, timeout, max_retries)
    }

    /// Queue a request with explicit `cmd`, per-attempt deadline and retry limit
    pub fn enqueue_with(
        &self,
        opcode: u16,
        payload: Value,
        cmd: u16,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<()> {
        self.session
            .outgoing
            .push(OutgoingEnvelope::new(opcode, payload, cmd, timeout, max_retries))
    }

    /// Whether the outgoing circuit breaker is currently open
    pub fn outgoing_paused(&self) -> bool {
        self.session.outgoing.breaker_open()
    }

    // ------------------------------------------------------------------
    // Event registration
    // ------------------------------------------------------------------

    /// Register a handler for `kind`, optionally gated by `filter`
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl EventHandler + 'static,
        filter: Option<Arc<dyn EventFilter>>,
    ) -> &Self {
        self.session.events.subscribe(kind, Arc::new(handler), filter);
        self
    }

    pub fn on_message(&self, handler: impl EventHandler + 'static) -> &Self {
        self.subscribe(EventKind::Message, handler, None)
    }

    pub fn on_message_filtered(
        &self,
        handler: impl EventHandler + 'static,
        filter: impl EventFilter + 'static,
    ) -> &Self {
        self.subscribe(EventKind::Message, handler, Some(Arc::new(filter)))
    }

    pub fn on_message_edit(&self, handler: impl EventHandler + 'static) -> &Self {
        self.subscribe(EventKind::MessageEdit, handler, None)
    }

    pub fn on_message_delete(&self, handler: impl EventHandler + 'static) -> &Self {
        self.subscribe(EventKind::MessageDelete, handler, None)
    }

    pub fn on_reaction_change(&self, handler: impl EventHandler + 'static) -> &Self {
        self.subscribe(EventKind::ReactionChange, handler, None)
    }

    pub fn on_chat_update(&self, handler: impl EventHandler + 'static) -> &Self {
        self.subscribe(EventKind::ChatUpdate, handler, None)
    }

    /// Every unsolicited frame, after the categorized handlers
    pub fn on_raw_receive(&self, handler: impl EventHandler + 'static) -> &Self {
        self.subscribe(EventKind::Raw, handler, None)
    }

    /// Run `callback` each time the session reaches `Running`
    pub fn on_start<F, Fut>(&self, callback: F) -> &Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let callback: StartCallback = Arc::new(move || callback().boxed());
        self.session.events.on_start(callback);
        self
    }

    /// Run `job` every `interval` while the session is running
    ///
    /// Jobs registered while running start with the next connection.
    pub fn add_scheduled_task<F, Fut>(&self, name: impl Into<String>, interval: Duration, job: F) -> &Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let job: ScheduledJob = Arc::new(move || job().boxed());
        self.session.jobs.write().push(JobRegistration {
            name: name.into(),
            job,
            interval,
        });
        self
    }

    /// Bounded queue of every unsolicited frame
    ///
    /// When full, new frames are dropped and counted in
    /// [`MetricsSnapshot::dropped_events`]. Calling again replaces the
    /// previous receiver.
    pub fn incoming_stream(&self) -> mpsc::Receiver<Frame> {
        self.session.events.incoming_stream()
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.session.state.get()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.session.state.is_connected()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.session.metrics.snapshot()
    }

    /// Requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.session.dispatcher.pending_count()
    }

    /// Try to receive a lifecycle event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive a lifecycle event (blocking)
    pub fn recv_event(&self) -> std::result::Result<ClientEvent, crossbeam_channel::RecvError> {
        self.event_rx.recv()
    }

    /// Shared shutdown flag; storing `false` stops the client
    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.session.shutdown_flag
    }

    pub fn config(&self) -> &ClientConfig {
        &self.session.config
    }

    pub fn device_id(&self) -> Result<String> {
        self.session.store.device_id()
    }

    /// Private chats from the last sync
    pub fn dialogs(&self) -> Vec<Value> {
        self.session.snapshot.read().dialogs.clone()
    }

    /// Group chats from the last sync
    pub fn chats(&self) -> Vec<Value> {
        self.session.snapshot.read().chats.clone()
    }

    pub fn channels(&self) -> Vec<Value> {
        self.session.snapshot.read().channels.clone()
    }

    /// Own profile from the last sync
    pub fn me(&self) -> Option<Value> {
        self.session.snapshot.read().me.clone()
    }
}
