use super::connection_state::{AtomicConnectionState, AtomicMetrics};
use super::dispatcher::{Dispatcher, Resolution};
use super::events::EventBus;
use crate::traits::{MaxWireError, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after a transient, non-fatal read error
pub const RECV_BACKOFF: Duration = Duration::from_millis(500);

/// Drain the transport until it fails
///
/// Frames are handled in arrival order. Undecodable frames are skipped.
/// On a transport-fatal error the connection is marked down, every pending
/// request is failed with `NotConnected`, and the error is returned so the
/// session can decide what to do next.
pub async fn run_receive_loop(
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventBus>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
) -> MaxWireError {
    debug!("Receive loop started");

    loop {
        match transport.receive_frame().await {
            Ok(frame) => {
                metrics.increment_received();
                for frame in frame.fan_out() {
                    let seq = frame.seq;
                    match dispatcher.resolve(frame) {
                        Resolution::Matched => debug!("Matched response for pending seq={}", seq),
                        Resolution::Unsolicited(frame) => {
                            debug!("Push frame opcode={} seq={}", frame.opcode, seq);
                            events.publish(frame);
                        }
                    }
                }
            }
            Err(e) if e.is_decode() => {
                metrics.increment_decode_failures();
                warn!("Skipping undecodable frame: {}", e);
            }
            Err(e) if e.is_transport_fatal() => {
                info!("Connection lost; exiting receive loop: {}", e);
                state.set_connected(false);
                metrics.record_error();
                let failed = dispatcher.fail_all(MaxWireError::NotConnected);
                if failed > 0 {
                    warn!("{} pending request(s) failed by disconnect", failed);
                }
                return e;
            }
            Err(e) => {
                warn!("Error in receive loop; backing off briefly: {}", e);
                tokio::time::sleep(RECV_BACKOFF).await;
            }
        }
    }
}
