use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Authenticating = 2,
    Syncing = 3,
    Running = 4,
    ErrorDetected = 5,
    Backoff = 6,
    Stopped = 7,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Authenticating,
            3 => ConnectionState::Syncing,
            4 => ConnectionState::Running,
            5 => ConnectionState::ErrorDetected,
            6 => ConnectionState::Backoff,
            7 => ConnectionState::Stopped,
            _ => ConnectionState::Idle,
        }
    }

    /// Whether a session attempt is underway (connect through running)
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Authenticating
                | ConnectionState::Syncing
                | ConnectionState::Running
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Lock-free lifecycle state plus the `is_connected` flag
///
/// `connected` is separate from the state: it flips true once the transport
/// is up and the receive loop is reading, and false the instant the
/// transport reports a failure, while the state machine may still be
/// mid-transition.
#[derive(Debug)]
pub struct AtomicConnectionState {
    state: AtomicU8,
    connected: AtomicBool,
}

impl AtomicConnectionState {
    pub fn new(initial: ConnectionState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
            connected: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Set the state, returning the previous one
    #[inline]
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.get() == ConnectionState::Running
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.get() == ConnectionState::Stopped
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Idle)
    }
}

/// Client counters
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    reconnects: AtomicU64,
    dropped_events: AtomicU64,
    dropped_envelopes: AtomicU64,
    decode_failures: AtomicU64,
    last_error_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`AtomicMetrics`]
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub reconnects: u64,
    pub dropped_events: u64,
    pub dropped_envelopes: u64,
    pub decode_failures: u64,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_dropped_events(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_dropped_envelopes(&self) {
        self.dropped_envelopes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_decode_failures(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        *self.last_error_at.lock() = Some(Utc::now());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            dropped_envelopes: self.dropped_envelopes.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            last_error_at: *self.last_error_at.lock(),
        }
    }
}
