//! Bounded task queue for fire-and-forget work
//!
//! Producers hand work to the queue and return immediately. The queue caps
//! how many tasks run at once and how many may be outstanding in total, and
//! it can be drained deterministically on shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};

/// Task queue limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Maximum number of tasks running at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum number of tasks queued or running before new work is rejected
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// How long shutdown waits for outstanding tasks, in seconds
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl TaskQueueConfig {
    /// Get the drain timeout as a Duration
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_pending: default_max_pending(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

const fn default_max_concurrency() -> usize {
    16
}

const fn default_max_pending() -> usize {
    4096
}

const fn default_drain_timeout_secs() -> u64 {
    10
}

/// Bounded-concurrency queue with drain-on-shutdown
///
/// Cheap to clone; clones share limits and tracking.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    name: Arc<str>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    tracker: TaskTracker,
}

/// Decrements the pending counter when a task finishes, even on panic
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl TaskQueue {
    /// Create a queue
    #[must_use]
    pub fn new(name: &str, config: &TaskQueueConfig) -> Self {
        Self {
            name: Arc::from(name),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: config.max_pending.max(1),
            tracker: TaskTracker::new(),
        }
    }

    /// Queue name, used in logs and errors
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit a task
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if `max_pending` tasks are already
    /// outstanding, or [`Error::QueueClosed`] once draining has begun.
    pub fn spawn<F, T>(&self, task: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(Error::QueueClosed(self.name.to_string()));
        }

        let previous = self.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(self.pending.clone());
        if previous >= self.max_pending {
            drop(guard);
            tracing::warn!(queue = %self.name, max_pending = self.max_pending, "Task queue full, rejecting work");
            return Err(Error::QueueFull(self.name.to_string()));
        }

        let permits = self.permits.clone();
        Ok(self.tracker.spawn(async move {
            let _guard = guard;
            let _permit = permits.acquire_owned().await.ok();
            task.await
        }))
    }

    /// Number of tasks queued or running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether draining has begun
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop accepting work and wait for outstanding tasks
    ///
    /// Returns `true` if every task finished within `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let outstanding = self.pending();
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        if drained {
            tracing::info!(queue = %self.name, drained = outstanding, "Task queue drained");
        } else {
            tracing::warn!(
                queue = %self.name,
                remaining = self.pending(),
                "Task queue drain timed out"
            );
        }
        drained
    }
}
