//! Interactive keep-alive ping
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Ping Task          │
//! │  (supervised)       │
//! │                     │
//! │  Every interval:    │
//! │  1. Wait for tick   │
//! │  2. PING ───────────┼──> send_and_wait ──> Transport
//! │  3. Repeat          │
//! └─────────────────────┘
//! ```
//!
//! The first ping goes out immediately after the session reaches
//! `Running`. A failed ping is logged and the task keeps going; it only
//! stops when the connection is gone or the task is cancelled with the
//! rest of its connection generation.

use crate::protocol::{opcode, CMD_REQUEST};
use crate::traits::{MaxWireError, RequestSender, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Send `PING {interactive: true}` every `interval`
pub async fn interactive_ping_task<S>(sender: Arc<S>, interval: Duration, timeout: Duration) -> Result<()>
where
    S: RequestSender + ?Sized,
{
    let mut ticker = tokio::time::interval(interval);
    // If a ping is slow, skip the missed ticks rather than bursting
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!("Ping task started with interval: {:?}", interval);

    loop {
        ticker.tick().await;
        match sender
            .send_and_wait(opcode::PING, json!({"interactive": true}), CMD_REQUEST, timeout)
            .await
        {
            Ok(_) => debug!("Interactive ping sent successfully"),
            Err(MaxWireError::NotConnected) => {
                debug!("Connection gone, stopping ping task");
                return Ok(());
            }
            Err(e) => warn!("Interactive ping failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    struct CountingSender {
        pings: Mutex<Vec<Value>>,
        connected_for: usize,
    }

    #[async_trait]
    impl RequestSender for CountingSender {
        async fn send_and_wait(
            &self,
            opcode: u16,
            payload: Value,
            cmd: u16,
            _timeout: Duration,
        ) -> Result<Frame> {
            let mut pings = self.pings.lock();
            if pings.len() >= self.connected_for {
                return Err(MaxWireError::NotConnected);
            }
            pings.push(payload.clone());
            Ok(Frame::new(11, cmd, 0, opcode, Value::Null))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_until_disconnected() {
        let sender = Arc::new(CountingSender {
            pings: Mutex::new(Vec::new()),
            connected_for: 3,
        });
        let started = tokio::time::Instant::now();

        interactive_ping_task(sender.clone(), Duration::from_secs(30), Duration::from_secs(10))
            .await
            .unwrap();

        let pings = sender.pings.lock();
        assert_eq!(pings.len(), 3);
        assert_eq!(pings[0], json!({"interactive": true}));
        // immediate, +30s, +60s, then the fourth attempt at +90s finds no connection
        assert_eq!(started.elapsed(), Duration::from_secs(90));
    }
}
