//! Bounded worker pool shared by every extension.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use super::DispatchError;
use crate::observability::{DispatchMetrics, EventBus, HostEvent};
use crate::{Error, Result};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolShutdown {
    /// Every job finished within the grace period.
    pub drained: bool,
    /// Jobs still queued or running when the grace period ran out.
    pub abandoned: usize,
}

/// Fixed number of execution slots. Each job waits for a slot and then runs on
/// a blocking thread, so extension code never stalls the async runtime.
#[derive(Debug)]
pub struct WorkerPool {
    capacity: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    handle: Handle,
    events: EventBus,
    metrics: Arc<DispatchMetrics>,
}

impl WorkerPool {
    /// Fails for zero capacity or when called outside a tokio runtime.
    pub fn new(capacity: usize, events: EventBus, metrics: Arc<DispatchMetrics>) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Pool("worker count must be at least 1".into()));
        }
        let handle = Handle::try_current()
            .map_err(|e| Error::Pool(format!("no async runtime available: {e}")))?;

        Ok(Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            tracker: TaskTracker::new(),
            handle,
            events,
            metrics,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently executing a job.
    pub fn busy(&self) -> usize {
        self.capacity
            .saturating_sub(self.permits.available_permits())
    }

    /// Jobs queued or running.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Queues `job`. Never waits for a free slot.
    pub fn execute<F>(&self, job: F) -> std::result::Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(DispatchError::PoolClosed);
        }

        let permits = Arc::clone(&self.permits);
        let capacity = self.capacity;
        let events = self.events.clone();
        let metrics = Arc::clone(&self.metrics);

        self.tracker.spawn_on(
            async move {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    tracing::debug!("Worker pool closed before job started");
                    return;
                };

                if permits.available_permits() == 0 {
                    tracing::warn!(busy = capacity, capacity, "Worker pool at capacity");
                    metrics.saturation_events.inc();
                    events.publish(HostEvent::PoolSaturated {
                        busy: capacity,
                        capacity,
                    });
                }

                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    tracing::error!(error = %e, "Worker job aborted");
                }
                drop(permit);
            },
            &self.handle,
        );
        Ok(())
    }

    /// Waits until no job is queued or running. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.tracker.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Stops accepting jobs and waits up to `grace` for outstanding ones.
    ///
    /// Jobs still waiting for a slot after the grace period never start.
    /// Running callbacks cannot be interrupted and are left to finish on
    /// their own.
    pub async fn shutdown(&self, grace: Duration) -> PoolShutdown {
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return PoolShutdown {
                drained: true,
                abandoned: 0,
            };
        }

        let abandoned = self.tracker.len();
        self.permits.close();
        tracing::warn!(
            abandoned,
            grace_ms = grace.as_millis() as u64,
            "Worker pool shutdown grace period expired"
        );
        PoolShutdown {
            drained: false,
            abandoned,
        }
    }
}
