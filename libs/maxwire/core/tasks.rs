use crate::Result;
use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, error, Instrument, Span};

/// Tracks background tasks so they can be cancelled together
///
/// Every task is wrapped so that an `Err` it returns, or a panic, is logged
/// here instead of escaping. Cancellation through [`TaskSupervisor::shutdown`]
/// is the normal stop signal and is not reported as a failure.
pub struct TaskSupervisor {
    tasks: Mutex<JoinSet<()>>,
    span: Span,
}

impl TaskSupervisor {
    pub fn new(span: Span) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            span,
        }
    }

    /// Spawn `fut` as a supervised task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task = async move {
            match fut.await {
                Ok(()) => debug!("Task {} finished", name),
                Err(e) => error!("Task {} failed: {}", name, e),
            }
        }
        .instrument(self.span.clone());

        let mut tasks = self.tasks.lock();
        // Reap what already finished so the set stays small
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                if e.is_panic() {
                    error!("Background task panicked: {}", e);
                }
            }
        }
        tasks.spawn(task);
    }

    /// Number of tasks not yet reaped
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every task and wait until all of them have stopped
    pub async fn shutdown(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        debug!("Cancelling {} background task(s)", tasks.len());
        tasks.abort_all();
        while let Some(done) = tasks.join_next().await {
            if let Err(e) = done {
                if e.is_panic() {
                    error!("Background task panicked: {}", e);
                }
            }
        }
    }
}
