//! Scheduling primitives
//!
//! Background loops (training scheduler, change watcher, notification flush)
//! never touch `tokio::time` directly: they take a `Ticker`, and training
//! due-ness takes a `Clock`. Tests drive both by hand.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

use crate::logic::registry::ModelRecord;

// ============================================================================
// CLOCK
// ============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// TICKER
// ============================================================================

#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick. `false` ends the loop.
    async fn tick(&mut self) -> bool;
}

/// Fixed-period ticker; the first tick fires after one full period
pub struct IntervalTicker {
    inner: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let start = tokio::time::Instant::now() + period;
        let mut inner = tokio::time::interval_at(start, period);
        inner.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { inner }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.inner.tick().await;
        true
    }
}

/// Ticks on demand; ends when every sender is dropped
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

impl ManualTicker {
    pub fn new() -> (mpsc::UnboundedSender<()>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

// ============================================================================
// TRAINING DUE CHECK
// ============================================================================

/// Due iff an interval is configured and it has elapsed since the last
/// training (or the model was never trained)
pub fn is_due(record: &ModelRecord, now: DateTime<Utc>) -> bool {
    let Some(interval) = record.train_interval() else {
        return false;
    };
    match record.last_trained_at {
        None => true,
        // An interval past the calendar range is never due
        Some(last) => last.checked_add_signed(interval).map_or(false, |due| now >= due),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Settable clock
    pub struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        pub fn advance(&self, by: chrono::Duration) {
            *self.0.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }
}
