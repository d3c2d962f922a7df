//! Best-effort outgoing queue
//!
//! Callers enqueue an [`OutgoingEnvelope`] and return immediately. A single
//! [`OutgoingWorker`] per connection drains the FIFO through
//! `send_and_wait`, retrying failures with a per-error-class delay and
//! pausing entirely while the [`CircuitBreaker`] is open.
//!
//! The queue and the breaker outlive connections: envelopes queued while
//! disconnected are sent once the next session reaches `Running`. An
//! envelope whose send or retry wait is cut short by a disconnect goes back
//! on the queue with one retry used up, so delivery is at-least-once.

use super::config::OutgoingConfig;
use super::connection_state::AtomicMetrics;
use crate::traits::{MaxWireError, RequestSender, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How often an open breaker re-checks its cool-down
pub const BREAKER_POLL: Duration = Duration::from_secs(5);

/// A queued send
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEnvelope {
    pub opcode: u16,
    pub payload: Value,
    pub cmd: u16,
    pub timeout: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl OutgoingEnvelope {
    pub fn new(opcode: u16, payload: Value, cmd: u16, timeout: Duration, max_retries: u32) -> Self {
        Self {
            opcode,
            payload,
            cmd,
            timeout,
            retry_count: 0,
            max_retries,
        }
    }
}

/// Delay before retrying a failed envelope
///
/// Connectivity errors wait 1s (2s for `NotConnected`), timeouts 5s, and
/// anything else `2^retry_count` seconds.
pub fn retry_delay(error: &MaxWireError, retry_count: u32) -> Duration {
    match error {
        MaxWireError::NotConnected => Duration::from_secs(2),
        MaxWireError::Timeout(_) => Duration::from_secs(5),
        MaxWireError::SendFailed(_)
        | MaxWireError::ConnectionClosed(_)
        | MaxWireError::HandshakeFailed(_)
        | MaxWireError::Proxy(_) => Duration::from_secs(1),
        _ => Duration::from_secs(2u64.saturating_pow(retry_count).min(3600)),
    }
}

/// Consecutive-failure circuit breaker
///
/// Each failure adds one to the error count, each success takes one away
/// (floor 0). When the count exceeds `threshold` the breaker opens; it
/// closes, and the count resets, once `cooldown` has passed since the last
/// recorded failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    errors: u32,
    open: bool,
    last_error: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            errors: 0,
            open: false,
            last_error: None,
        }
    }

    pub fn record_success(&mut self) {
        self.errors = self.errors.saturating_sub(1);
    }

    /// Record a failure, returning true when this opened the breaker
    pub fn record_failure(&mut self) -> bool {
        self.errors += 1;
        self.last_error = Some(Instant::now());
        if !self.open && self.errors > self.threshold {
            self.open = true;
            return true;
        }
        false
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    /// Time left before the breaker may close
    pub fn remaining_cooldown(&self) -> Duration {
        match (self.open, self.last_error) {
            (true, Some(at)) => self.cooldown.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// Close the breaker if the cool-down has elapsed
    pub fn try_close(&mut self) -> bool {
        if self.open && self.remaining_cooldown().is_zero() {
            self.open = false;
            self.errors = 0;
            return true;
        }
        false
    }
}

/// FIFO of envelopes plus the breaker guarding it
///
/// Cheap to clone; all clones share the same queue.
#[derive(Clone)]
pub struct OutgoingQueue {
    tx: mpsc::UnboundedSender<OutgoingEnvelope>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<OutgoingEnvelope>>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    default_max_retries: u32,
}

impl OutgoingQueue {
    pub fn new(config: &OutgoingConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            breaker: Arc::new(Mutex::new(CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs_f64(config.breaker_cooldown_secs),
            ))),
            default_max_retries: config.max_retries,
        }
    }

    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries
    }

    pub fn push(&self, envelope: OutgoingEnvelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| MaxWireError::ChannelSend("outgoing queue closed".into()))
    }

    pub fn breaker_open(&self) -> bool {
        self.breaker.lock().is_open()
    }
}

/// Drains an [`OutgoingQueue`] through a [`RequestSender`]
pub struct OutgoingWorker<S: RequestSender + ?Sized> {
    sender: Arc<S>,
    queue: OutgoingQueue,
    metrics: Arc<AtomicMetrics>,
}

impl<S: RequestSender + ?Sized> OutgoingWorker<S> {
    pub fn new(sender: Arc<S>, queue: OutgoingQueue, metrics: Arc<AtomicMetrics>) -> Self {
        Self {
            sender,
            queue,
            metrics,
        }
    }

    /// Run until cancelled
    ///
    /// Only one worker can drain the queue at a time; a second one waits for
    /// the first to be dropped.
    pub async fn run(self) -> Result<()> {
        let receiver = self.queue.rx.clone();
        let mut rx = receiver.lock().await;
        debug!("Outgoing worker started");

        loop {
            let pause = {
                let mut breaker = self.queue.breaker.lock();
                if breaker.is_open() && breaker.try_close() {
                    info!("Circuit breaker reset");
                }
                breaker
                    .is_open()
                    .then(|| breaker.remaining_cooldown().min(BREAKER_POLL))
            };
            if let Some(pause) = pause {
                tokio::time::sleep(pause).await;
                continue;
            }

            let Some(envelope) = rx.recv().await else {
                return Ok(());
            };
            self.process(envelope).await?;
        }
    }

    async fn process(&self, envelope: OutgoingEnvelope) -> Result<()> {
        // The breaker may have opened while we were parked on recv
        if self.queue.breaker.lock().is_open() {
            return self.queue.push(envelope);
        }

        let OutgoingEnvelope {
            opcode,
            cmd,
            timeout,
            retry_count,
            max_retries,
            ..
        } = envelope;
        let payload = envelope.payload.clone();

        // Covers both the send and the retry sleep below
        let mut in_flight = InFlight::new(&self.queue, &self.metrics, envelope);
        let error = match self.sender.send_and_wait(opcode, payload, cmd, timeout).await {
            Ok(frame) => {
                in_flight.settle();
                if let Some(server_error) = frame.server_error() {
                    warn!("Queued opcode={} answered with error: {}", opcode, server_error);
                } else {
                    debug!("Message sent successfully from queue");
                }
                self.queue.breaker.lock().record_success();
                return Ok(());
            }
            Err(e) => e,
        };

        self.metrics.record_error();
        let opened = {
            let mut breaker = self.queue.breaker.lock();
            let opened = breaker.record_failure();
            if opened {
                warn!(
                    "Circuit breaker activated due to {} consecutive errors",
                    breaker.error_count()
                );
            }
            opened
        };
        if opened {
            // Parked unchanged until the breaker closes
            return match in_flight.settle() {
                Some(envelope) => self.queue.push(envelope),
                None => Ok(()),
            };
        }

        let delay = retry_delay(&error, retry_count);
        warn!(
            "Failed to send message from queue: {} (delay: {:?})",
            error, delay
        );

        if retry_count < max_retries {
            tokio::time::sleep(delay).await;
            match in_flight.settle() {
                Some(mut envelope) => {
                    envelope.retry_count += 1;
                    self.queue.push(envelope)
                }
                None => Ok(()),
            }
        } else {
            in_flight.settle();
            self.metrics.increment_dropped_envelopes();
            error!(
                "Message opcode={} failed after {} retries, dropping",
                opcode, max_retries
            );
            Ok(())
        }
    }
}

/// Holds an envelope while the worker awaits on it
///
/// If the worker is cancelled before [`InFlight::settle`], the envelope goes
/// back on the queue as a retry, or is counted as dropped when it has no
/// retries left.
struct InFlight<'a> {
    queue: &'a OutgoingQueue,
    metrics: &'a AtomicMetrics,
    envelope: Option<OutgoingEnvelope>,
}

impl<'a> InFlight<'a> {
    fn new(
        queue: &'a OutgoingQueue,
        metrics: &'a AtomicMetrics,
        envelope: OutgoingEnvelope,
    ) -> Self {
        Self {
            queue,
            metrics,
            envelope: Some(envelope),
        }
    }

    fn settle(&mut self) -> Option<OutgoingEnvelope> {
        self.envelope.take()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let Some(mut envelope) = self.envelope.take() else {
            return;
        };
        if envelope.retry_count < envelope.max_retries {
            envelope.retry_count += 1;
            warn!(
                "Send of opcode={} interrupted, requeueing (retry {}/{})",
                envelope.opcode, envelope.retry_count, envelope.max_retries
            );
            if let Err(e) = self.queue.push(envelope) {
                self.metrics.increment_dropped_envelopes();
                error!("Failed to requeue interrupted message: {}", e);
            }
        } else {
            self.metrics.increment_dropped_envelopes();
            error!(
                "Send of opcode={} interrupted with no retries left, dropping",
                envelope.opcode
            );
        }
    }
}
