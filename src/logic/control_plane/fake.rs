//! In-memory control plane for tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::client::{ChangeSignal, ControlPlane, ControlPlaneError, LabelledRequest, ModelResults};
use crate::logic::notify::QueuedNotification;
use crate::logic::registry::RemoteModel;

#[derive(Default)]
pub struct FakeControlPlane {
    pub models: Mutex<Vec<RemoteModel>>,
    pub selected: Mutex<Option<RemoteModel>>,
    pub requests: Mutex<Vec<LabelledRequest>>,
    pub artifacts: Mutex<HashMap<String, Vec<u8>>>,
    pub results: Mutex<Vec<ModelResults>>,
    pub submitted: Mutex<Vec<Vec<QueuedNotification>>>,
    changes: Mutex<VecDeque<Result<ChangeSignal, ControlPlaneError>>>,
    change_polls: AtomicUsize,
    offline: AtomicBool,
}

impl FakeControlPlane {
    pub fn script_changes(&self, script: Vec<Result<bool, ControlPlaneError>>) {
        *self.changes.lock() = script
            .into_iter()
            .map(|r| r.map(|updated| ChangeSignal { model_setting_updated: updated }))
            .collect();
    }

    pub fn change_polls(&self) -> usize {
        self.change_polls.load(Ordering::SeqCst)
    }

    /// Every call fails with a network error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), ControlPlaneError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ControlPlaneError::Network("offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_models(&self) -> Result<Vec<RemoteModel>, ControlPlaneError> {
        self.check_online()?;
        Ok(self.models.lock().clone())
    }

    async fn selected_model(&self) -> Result<Option<RemoteModel>, ControlPlaneError> {
        self.check_online()?;
        Ok(self.selected.lock().clone())
    }

    async fn changes(&self) -> Result<ChangeSignal, ControlPlaneError> {
        self.change_polls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.changes.lock().pop_front().unwrap_or(Ok(ChangeSignal::default()))
    }

    async fn post_results(&self, results: &ModelResults) -> Result<(), ControlPlaneError> {
        self.check_online()?;
        self.results.lock().push(results.clone());
        Ok(())
    }

    async fn submit_analysis(&self, batch: &[QueuedNotification]) -> Result<(), ControlPlaneError> {
        self.check_online()?;
        self.submitted.lock().push(batch.to_vec());
        Ok(())
    }

    async fn fetch_requests(&self) -> Result<Vec<LabelledRequest>, ControlPlaneError> {
        self.check_online()?;
        Ok(self.requests.lock().clone())
    }

    async fn download_artifact(&self, id: &str) -> Result<Vec<u8>, ControlPlaneError> {
        self.check_online()?;
        self.artifacts
            .lock()
            .get(id)
            .cloned()
            .ok_or(ControlPlaneError::Server(404))
    }
}
