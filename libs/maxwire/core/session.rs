//! Session lifecycle and reconnect state machine
//!
//! ```text
//! Idle → Connecting → Authenticating → Syncing → Running
//!            ▲                                      │ transport closed / setup failed
//!            │                                      ▼
//!            └──────── Backoff ◄──────────── ErrorDetected ──► Stopped
//! ```
//!
//! One pass through `Connecting..Running` is a *generation*. Each
//! generation owns a [`TaskSupervisor`] holding its receive loop, ping,
//! outgoing worker, scheduled jobs and start callbacks. Whatever ends the
//! generation, cleanup runs in the same order: cancel the generation's
//! tasks, fail every pending request, close the transport. Only then does
//! the machine back off or stop.

use super::auth::{AuthService, Registration, SyncSnapshot};
use super::config::ClientConfig;
use super::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use super::dispatcher::Dispatcher;
use super::events::EventBus;
use super::heartbeat::interactive_ping_task;
use super::outgoing::{OutgoingQueue, OutgoingWorker};
use super::receive_loop::run_receive_loop;
use super::scheduler::{run_scheduled_job, ScheduledJob};
use super::tasks::TaskSupervisor;
use crate::protocol::{opcode, CMD_REQUEST};
use crate::traits::{
    CodeProvider, CredentialStore, ErrorClass, MaxWireError, ReconnectionStrategy, Result,
};
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn, Instrument, Span};

/// How often waits re-check the shutdown flag
pub const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Lifecycle notifications, readable through `MaxClient::try_recv_event`
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Session reached `Running`
    Connected,
    /// A running session lost its connection
    Disconnected,
    /// About to retry (attempt number, 1-based)
    Reconnecting(usize),
    /// A generation failed
    Error(String),
    /// The lifecycle ended
    Stopped,
}

/// A periodic job registered before or during the session
#[derive(Clone)]
pub(crate) struct JobRegistration {
    pub name: String,
    pub job: ScheduledJob,
    pub interval: Duration,
}

/// Shared state behind a `MaxClient`
pub(crate) struct Session {
    pub config: Arc<ClientConfig>,
    pub dispatcher: Arc<Dispatcher>,
    pub events: Arc<EventBus>,
    pub state: Arc<AtomicConnectionState>,
    pub metrics: Arc<AtomicMetrics>,
    pub store: Arc<dyn CredentialStore>,
    pub codes: Arc<dyn CodeProvider>,
    pub strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    pub outgoing: OutgoingQueue,
    pub jobs: RwLock<Vec<JobRegistration>>,
    pub snapshot: RwLock<SyncSnapshot>,
    /// true = keep running
    pub shutdown_flag: Arc<AtomicBool>,
    pub event_tx: Sender<ClientEvent>,
    pub span: Span,
    /// true while `run` is executing
    running: watch::Sender<bool>,
    /// Set by `MaxClient::close`; the next `run` re-arms the shutdown flag
    closed: AtomicBool,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ClientConfig>,
        dispatcher: Arc<Dispatcher>,
        events: Arc<EventBus>,
        state: Arc<AtomicConnectionState>,
        metrics: Arc<AtomicMetrics>,
        store: Arc<dyn CredentialStore>,
        codes: Arc<dyn CodeProvider>,
        strategy: Box<dyn ReconnectionStrategy>,
        shutdown_flag: Arc<AtomicBool>,
        event_tx: Sender<ClientEvent>,
        span: Span,
    ) -> Self {
        let outgoing = OutgoingQueue::new(&config.outgoing);
        Self {
            config,
            dispatcher,
            events,
            state,
            metrics,
            store,
            codes,
            strategy: Mutex::new(strategy),
            outgoing,
            jobs: RwLock::new(Vec::new()),
            snapshot: RwLock::new(SyncSnapshot::default()),
            shutdown_flag,
            event_tx,
            span,
            running: watch::Sender::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    fn keep_running(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Resolves once the shutdown flag is cleared
    async fn stop_requested(&self) {
        while self.keep_running() {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
    }

    /// Drive the lifecycle until stopped
    ///
    /// Returns `Ok(())` after an external stop, the triggering error for
    /// configuration and authentication failures, and `ReconnectionFailed`
    /// once the reconnection strategy gives up.
    pub async fn run(&self) -> Result<()> {
        if self.running.send_replace(true) {
            return Err(MaxWireError::InvalidState("client already started".into()));
        }
        if self.closed.swap(false, Ordering::AcqRel) {
            debug!(parent: &self.span, "Restarting after close");
            self.shutdown_flag.store(true, Ordering::Release);
        }
        let result = self.lifecycle().instrument(self.span.clone()).await;
        self.state.set(ConnectionState::Stopped);
        self.emit(ClientEvent::Stopped);
        info!(parent: &self.span, "Session stopped");
        self.running.send_replace(false);
        result
    }

    /// Clear the shutdown flag and wait until `run` has returned
    ///
    /// By then the generation's tasks are cancelled, pending requests have
    /// failed and the transport is closed.
    pub async fn stop(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown_flag.store(false, Ordering::Release);
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    async fn lifecycle(&self) -> Result<()> {
        let mut attempt = 0usize;

        loop {
            if !self.keep_running() {
                debug!("Shutdown flag cleared, leaving lifecycle");
                return Ok(());
            }

            let tasks = TaskSupervisor::new(self.span.clone());
            let mut reached_running = false;
            let outcome = tokio::select! {
                outcome = self.run_generation(&tasks, &mut attempt, &mut reached_running) => outcome,
                _ = self.stop_requested() => Ok(()),
            };
            self.cleanup(&tasks).await;
            if reached_running {
                self.emit(ClientEvent::Disconnected);
            }

            let error = match outcome {
                Ok(()) => return Ok(()),
                Err(_) if !self.keep_running() => return Ok(()),
                Err(e) => e,
            };

            self.state.set(ConnectionState::ErrorDetected);
            error!("Session error: {}", error);
            self.emit(ClientEvent::Error(error.to_string()));

            match error.class() {
                ErrorClass::Configuration => return Err(error),
                ErrorClass::Authentication => {
                    self.clear_token();
                    return Err(error);
                }
                _ => {}
            }

            if !self.config.reconnect {
                info!("Reconnect disabled, stopping");
                return Err(error);
            }

            let next = self.strategy.lock().next_delay(attempt);
            let Some(delay) = next else {
                warn!("Reconnection strategy exhausted after {} attempt(s)", attempt + 1);
                return Err(MaxWireError::ReconnectionFailed {
                    attempts: attempt + 1,
                    reason: error.to_string(),
                });
            };

            self.state.set(ConnectionState::Backoff);
            info!("Reconnecting in {:?} (attempt {})", delay, attempt + 1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop_requested() => {
                    debug!("Shutdown flag cleared during backoff");
                    return Ok(());
                }
            }

            attempt += 1;
            self.metrics.increment_reconnects();
            self.emit(ClientEvent::Reconnecting(attempt));
        }
    }

    /// One pass from `Connecting` to the end of `Running`
    ///
    /// Always ends in an error; an external stop is handled by the caller.
    async fn run_generation(
        &self,
        tasks: &TaskSupervisor,
        attempt: &mut usize,
        reached_running: &mut bool,
    ) -> Result<()> {
        self.state.set(ConnectionState::Connecting);
        let transport = self.dispatcher.transport().clone();
        info!("Connecting via {} transport", transport.kind());
        transport.connect().await?;
        self.state.set_connected(true);

        let (exit_tx, exit_rx) = oneshot::channel();
        {
            let transport = transport.clone();
            let dispatcher = self.dispatcher.clone();
            let events = self.events.clone();
            let state = self.state.clone();
            let metrics = self.metrics.clone();
            tasks.spawn("receive_loop", async move {
                let reason = run_receive_loop(transport, dispatcher, events, state, metrics).await;
                let _ = exit_tx.send(reason);
                Ok(())
            });
        }

        let device_id = self.store.device_id()?;
        self.handshake(&device_id).await?;

        self.state.set(ConnectionState::Authenticating);
        let auth = AuthService::new(
            self.dispatcher.clone(),
            self.codes.clone(),
            self.config.request_timeout(),
            self.config.language.clone(),
        );
        let token = self.authenticate(&auth, &device_id).await?;

        self.state.set(ConnectionState::Syncing);
        let snapshot = auth.sync(&token, self.config.chats_count).await?;
        *self.snapshot.write() = snapshot;

        self.state.set(ConnectionState::Running);
        self.spawn_running_tasks(tasks);
        *attempt = 0;
        self.strategy.lock().reset();
        *reached_running = true;
        info!("Session running");
        self.emit(ClientEvent::Connected);

        // The sender only goes away without a reason if the loop panicked
        Err(exit_rx.await.unwrap_or_else(|_| {
            MaxWireError::ConnectionClosed("receive loop ended unexpectedly".into())
        }))
    }

    async fn handshake(&self, device_id: &str) -> Result<()> {
        debug!("Sending handshake");
        let user_agent = serde_json::to_value(&self.config.user_agent)
            .map_err(|e| MaxWireError::Encode(e.to_string()))?;
        self.dispatcher
            .send_and_wait(
                opcode::SESSION_INIT,
                json!({"deviceId": device_id, "userAgent": user_agent}),
                CMD_REQUEST,
                self.config.request_timeout(),
            )
            .await
            .and_then(|frame| frame.into_result())
            .map_err(|e| match e {
                MaxWireError::NotConnected => e,
                other => MaxWireError::HandshakeFailed(other.to_string()),
            })?;
        info!("Handshake completed");
        Ok(())
    }

    /// Token for this generation, logging in when none is known
    ///
    /// A token obtained by login is persisted as the last step.
    async fn authenticate(&self, auth: &AuthService<Dispatcher>, device_id: &str) -> Result<String> {
        let stored = self.store.auth_token()?;
        match (stored, self.config.token.as_deref()) {
            (Some(token), _) => Ok(token),
            (None, Some(provided)) => {
                info!("Persisting provided token");
                self.store.update_auth_token(device_id, Some(provided))?;
                Ok(provided.to_string())
            }
            (None, None) => {
                let phone = self.config.phone.as_deref().ok_or_else(|| {
                    MaxWireError::Configuration("phone is required when no token is given".into())
                })?;
                let registration = self
                    .config
                    .registration
                    .then(|| self.config.first_name.clone())
                    .flatten()
                    .map(|first_name| Registration {
                        first_name,
                        last_name: self.config.last_name.clone(),
                    });
                let token = auth.login(phone, registration.as_ref()).await?;
                self.store.update_auth_token(device_id, Some(&token))?;
                Ok(token)
            }
        }
    }

    fn spawn_running_tasks(&self, tasks: &TaskSupervisor) {
        tasks.spawn(
            "interactive_ping",
            interactive_ping_task(
                self.dispatcher.clone(),
                self.config.ping_interval(),
                self.config.request_timeout(),
            ),
        );

        let worker = OutgoingWorker::new(
            self.dispatcher.clone(),
            self.outgoing.clone(),
            self.metrics.clone(),
        );
        tasks.spawn("outgoing_worker", worker.run());

        for registration in self.jobs.read().iter() {
            tasks.spawn(
                "scheduled_job",
                run_scheduled_job(
                    registration.name.clone(),
                    registration.job.clone(),
                    registration.interval,
                ),
            );
        }

        let events = self.events.clone();
        tasks.spawn("on_start", async move {
            events.run_on_start().await;
            Ok(())
        });
    }

    /// Tear down a generation; safe to call more than once
    async fn cleanup(&self, tasks: &TaskSupervisor) {
        tasks.shutdown().await;
        self.state.set_connected(false);
        let failed = self.dispatcher.fail_all(MaxWireError::NotConnected);
        if failed > 0 {
            debug!("Failed {} pending request(s) during cleanup", failed);
        }
        if let Err(e) = self.dispatcher.transport().close().await {
            debug!("Transport close: {}", e);
        }
    }

    fn clear_token(&self) {
        warn!("Clearing stored auth token");
        let result = self
            .store
            .device_id()
            .and_then(|device_id| self.store.update_auth_token(&device_id, None));
        if let Err(e) = result {
            error!("Failed to clear auth token: {}", e);
        }
    }
}
