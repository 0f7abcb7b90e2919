//! Notification Batcher - secondary classification results → control plane
//!
//! Delivery is at-most-once: a batch is swapped out of the queue before the
//! send, and a failed send drops it (logged). Memory stays bounded by the
//! batch capacity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::logic::control_plane::ControlPlaneError;
use crate::logic::schedule::Ticker;

#[cfg(test)]
mod tests;

// ============================================================================
// TYPES
// ============================================================================

/// One typed anomaly, as posted to `/submit-analysis`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub request_id: String,
    pub threat_type: String,
}

/// Where flushed batches go
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, batch: &[QueuedNotification]) -> Result<(), ControlPlaneError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatcherStatus {
    pub pending: usize,
    pub capacity: usize,
    pub sent: u64,
    pub dropped: u64,
}

// ============================================================================
// BATCHER
// ============================================================================

pub struct NotificationBatcher {
    queue: Mutex<Vec<QueuedNotification>>,
    capacity: usize,
    sink: Arc<dyn NotificationSink>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl NotificationBatcher {
    pub fn new(capacity: usize, sink: Arc<dyn NotificationSink>) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            sink,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append; a full queue is swapped out and sent
    pub async fn enqueue(&self, notification: QueuedNotification) {
        let full_batch = {
            let mut queue = self.queue.lock();
            queue.push(notification);
            if queue.len() >= self.capacity {
                Some(std::mem::take(&mut *queue))
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            self.deliver(batch).await;
        }
    }

    /// Swap out whatever is queued and send it once
    pub async fn flush(&self) {
        let batch = std::mem::take(&mut *self.queue.lock());
        if batch.is_empty() {
            return;
        }
        self.deliver(batch).await;
    }

    async fn deliver(&self, batch: Vec<QueuedNotification>) {
        let count = batch.len() as u64;
        match self.sink.deliver(&batch).await {
            Ok(()) => {
                self.sent.fetch_add(count, Ordering::Relaxed);
                log::info!("Submitted {} threat analyses", count);
            }
            Err(e) => {
                self.dropped.fetch_add(count, Ordering::Relaxed);
                log::warn!("Dropping {} threat analyses: {}", count, e);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn status(&self) -> BatcherStatus {
        BatcherStatus {
            pending: self.pending(),
            capacity: self.capacity,
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Periodic flush for batches that never reach capacity
    pub async fn run_flush_loop(self: Arc<Self>, mut ticker: impl Ticker, shutdown: CancellationToken) {
        log::info!("Notification flush loop started (capacity {})", self.capacity);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                more = ticker.tick() => {
                    if !more {
                        break;
                    }
                    self.flush().await;
                }
            }
        }
        // Last chance for stragglers
        self.flush().await;
        log::info!("Notification flush loop stopped");
    }
}
