use std::time::Duration;

/// Delay policy between session attempts
///
/// Consulted after every connectivity failure. `attempt` counts the
/// consecutive failures since the session last reached `Running`, starting
/// at 0.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before the next attempt, or `None` to give up
    fn next_delay(&self, attempt: usize) -> Option<Duration>;

    /// Called each time the session reaches `Running`
    fn reset(&mut self) {}

    /// Attempt ceiling, `None` for unlimited
    fn attempt_limit(&self) -> Option<usize> {
        None
    }

    fn should_reconnect(&self, attempt: usize) -> bool {
        self.attempt_limit().map_or(true, |limit| attempt < limit)
    }
}

/// `base * 2^attempt`, capped at `max_delay`
///
/// With base 1s and cap 60s: 1, 2, 4, 8, 16, 32, 60, 60, ...
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    limit: Option<usize>,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, limit: Option<usize>) -> Self {
        Self {
            base_delay,
            max_delay,
            limit,
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), None)
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if !self.should_reconnect(attempt) {
            return None;
        }

        // Saturate instead of overflowing on long outages
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
        let delay = 2u32
            .checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    fn attempt_limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Same delay before every attempt
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    limit: Option<usize>,
}

impl FixedDelay {
    pub fn new(delay: Duration, limit: Option<usize>) -> Self {
        Self { delay, limit }
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, attempt: usize) -> Option<Duration> {
        self.should_reconnect(attempt).then_some(self.delay)
    }

    fn attempt_limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Gives up on the first failure
#[derive(Debug, Clone)]
pub struct NeverReconnect;

impl ReconnectionStrategy for NeverReconnect {
    fn next_delay(&self, _attempt: usize) -> Option<Duration> {
        None
    }

    fn attempt_limit(&self) -> Option<usize> {
        Some(0)
    }
}
