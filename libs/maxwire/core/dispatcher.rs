//! Sequence-correlated request/response dispatch
//!
//! Every request gets the next sequence number (wrapped to the transport's
//! header width) and a single-resolution slot in the pending table. The
//! receive loop hands each inbound frame to [`Dispatcher::resolve`]: a
//! frame whose sequence is pending completes that slot exactly once, every
//! other frame comes back as unsolicited.
//!
//! The pending table is only touched inside short `parking_lot` critical
//! sections; the transport write lock is never held while waiting for a
//! response.

use super::connection_state::{AtomicConnectionState, AtomicMetrics};
use crate::protocol::{Frame, SequenceWidth};
use crate::traits::{MaxWireError, RequestSender, Result, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Waiter = oneshot::Sender<Result<Frame>>;

/// Outcome of feeding an inbound frame to the dispatcher
#[derive(Debug)]
pub enum Resolution {
    /// Delivered to the request waiting on this sequence
    Matched,
    /// Nobody is waiting; the frame is a push event
    Unsolicited(Frame),
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    version: u8,
    width: SequenceWidth,
    seq: AtomicU64,
    request_ids: AtomicU64,
    /// seq -> (request id, waiter); the id tells a slot apart from a newer
    /// one that reused the same sequence
    pending: Mutex<HashMap<u64, (u64, Waiter)>>,
}

/// Removes a pending slot when the waiting future finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<u64, (u64, Waiter)>>,
    seq: u64,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending.get(&self.seq).map_or(false, |(id, _)| *id == self.id) {
            pending.remove(&self.seq);
        }
    }
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<AtomicConnectionState>,
        metrics: Arc<AtomicMetrics>,
        version: u8,
    ) -> Self {
        let width = transport.kind().sequence_width();
        Self {
            transport,
            state,
            metrics,
            version,
            width,
            seq: AtomicU64::new(0),
            request_ids: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[inline]
    fn next_seq(&self) -> u64 {
        self.width.wrap(self.seq.fetch_add(1, Ordering::Relaxed))
    }

    fn send_error(e: MaxWireError) -> MaxWireError {
        match e {
            MaxWireError::NotConnected
            | MaxWireError::SendFailed(_)
            | MaxWireError::Encode(_) => e,
            other => MaxWireError::SendFailed(other.to_string()),
        }
    }

    /// Send a request and wait for its response frame
    ///
    /// # Errors
    /// - `NotConnected` when no transport is up
    /// - `SendFailed` when the write fails
    /// - `Timeout` when nothing arrives within `timeout`
    /// - `Cancelled` when a newer request reused this sequence first
    /// - whatever the connection failure was, when it drops mid-wait
    pub async fn send_and_wait(
        &self,
        opcode: u16,
        payload: Value,
        cmd: u16,
        timeout: Duration,
    ) -> Result<Frame> {
        if !self.state.is_connected() {
            return Err(MaxWireError::NotConnected);
        }

        let seq = self.next_seq();
        let id = self.request_ids.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::new(self.version, cmd, seq, opcode, payload);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            if let Some((_, stale)) = pending.insert(seq, (id, tx)) {
                warn!("Sequence {} reused while still pending, cancelling older request", seq);
                let _ = stale.send(Err(MaxWireError::Cancelled));
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            seq,
            id,
        };

        debug!("Sending frame opcode={} cmd={} seq={}", opcode, cmd, seq);
        self.transport
            .send_frame(&frame)
            .await
            .map_err(Self::send_error)?;
        self.metrics.increment_sent();

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MaxWireError::NotConnected),
            Err(_) => {
                debug!("Request opcode={} seq={} timed out", opcode, seq);
                Err(MaxWireError::Timeout(format!(
                    "no response to opcode={} seq={} within {:?}",
                    opcode, seq, timeout
                )))
            }
        }
    }

    /// Send a frame without registering a pending slot
    pub async fn send_fire_and_forget(&self, opcode: u16, payload: Value, cmd: u16) -> Result<()> {
        if !self.state.is_connected() {
            return Err(MaxWireError::NotConnected);
        }
        let frame = Frame::new(self.version, cmd, self.next_seq(), opcode, payload);
        self.transport
            .send_frame(&frame)
            .await
            .map_err(Self::send_error)?;
        self.metrics.increment_sent();
        Ok(())
    }

    /// Route an inbound frame to its waiter, if any
    pub fn resolve(&self, frame: Frame) -> Resolution {
        let waiter = self.pending.lock().remove(&frame.seq);
        match waiter {
            Some((_, tx)) => match tx.send(Ok(frame)) {
                Ok(()) => Resolution::Matched,
                // Waiter gave up between lookup and delivery
                Err(Ok(frame)) => Resolution::Unsolicited(frame),
                Err(Err(_)) => Resolution::Matched,
            },
            None => Resolution::Unsolicited(frame),
        }
    }

    /// Fail and clear every pending request, returning how many there were
    pub fn fail_all(&self, error: MaxWireError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, (_, tx)) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        if count > 0 {
            debug!("Failed {} pending request(s): {}", count, error);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl RequestSender for Dispatcher {
    async fn send_and_wait(
        &self,
        opcode: u16,
        payload: Value,
        cmd: u16,
        timeout: Duration,
    ) -> Result<Frame> {
        Dispatcher::send_and_wait(self, opcode, payload, cmd, timeout).await
    }
}
