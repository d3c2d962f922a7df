use crate::protocol::Frame;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Narrow request/response interface
///
/// Services that only need to issue requests (auth, heartbeat, the outgoing
/// worker) depend on this instead of on the whole dispatcher.
#[async_trait]
pub trait RequestSender: Send + Sync + 'static {
    /// Send a request and wait for the frame carrying the same sequence
    ///
    /// The returned frame may still carry an application-level `error`
    /// field; use [`Frame::into_result`] to surface it.
    async fn send_and_wait(
        &self,
        opcode: u16,
        payload: Value,
        cmd: u16,
        timeout: Duration,
    ) -> Result<Frame>;
}
