//! Change Watcher
//!
//! Polls `GET /changes` (the control plane has no push channel). A positive
//! signal hands off to the refresh callback; a failed poll is logged and the
//! next tick tries again.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::client::{ControlPlane, ControlPlaneError};
use crate::logic::schedule::Ticker;

pub struct ChangeWatcher {
    control_plane: Arc<dyn ControlPlane>,
}

impl ChangeWatcher {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// One poll: did model settings change?
    pub async fn poll_once(&self) -> Result<bool, ControlPlaneError> {
        Ok(self.control_plane.changes().await?.model_setting_updated)
    }

    /// Poll on every tick until the ticker ends or shutdown
    pub async fn run<F, Fut>(self, mut ticker: impl Ticker, shutdown: CancellationToken, mut on_change: F)
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        log::info!("Change watcher started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                more = ticker.tick() => {
                    if !more {
                        break;
                    }
                    match self.poll_once().await {
                        Ok(true) => {
                            log::info!("Model settings changed upstream, refreshing");
                            on_change().await;
                        }
                        Ok(false) => log::debug!("No upstream model changes"),
                        Err(e) => log::warn!("Change poll failed: {}", e),
                    }
                }
            }
        }
        log::info!("Change watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::control_plane::fake::FakeControlPlane;
    use crate::logic::schedule::ManualTicker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_errors_do_not_stop_the_loop() {
        let plane = Arc::new(FakeControlPlane::default());
        plane.script_changes(vec![
            Err(ControlPlaneError::Network("down".into())),
            Ok(false),
            Err(ControlPlaneError::Server(502)),
            Ok(true),
            Ok(true),
        ]);

        let refreshes = Arc::new(AtomicUsize::new(0));
        let (tick, ticker) = ManualTicker::new();
        for _ in 0..5 {
            tick.send(()).unwrap();
        }
        drop(tick);

        let counter = refreshes.clone();
        ChangeWatcher::new(plane.clone())
            .run(ticker, CancellationToken::new(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(plane.change_polls(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_stops_watcher() {
        let plane = Arc::new(FakeControlPlane::default());
        let (_tick, ticker) = ManualTicker::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        ChangeWatcher::new(plane.clone())
            .run(ticker, shutdown, || async {})
            .await;
        assert_eq!(plane.change_polls(), 0);
    }
}
