use crate::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A periodic background job
pub type ScheduledJob = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Run `job` every `interval` (first run after one interval)
///
/// A failing run is logged; the schedule continues.
pub async fn run_scheduled_job(name: String, job: ScheduledJob, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick
    ticker.tick().await;
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    debug!("Scheduled job '{}' started, every {:?}", name, interval);

    loop {
        ticker.tick().await;
        if let Err(e) = job().await {
            warn!("Scheduled job '{}' failed: {}", name, e);
        }
    }
}
