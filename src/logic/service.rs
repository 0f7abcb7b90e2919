//! ML Service - the single owned object behind the serving shell
//!
//! Holds the registry, the model cache, the training orchestrator and the
//! notification batcher, and wires the background loops together. Nothing
//! here is a process-wide global: the shell gets an `Arc<MlService>`.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants;
use crate::logic::config::ServiceConfig;
use crate::logic::control_plane::{
    AnalysisSink, ChangeWatcher, ControlPlane, ControlPlaneError, HttpControlPlane,
};
use crate::logic::features::{BadWords, ExtractionMode, FeatureExtractor, RequestDescriptor};
use crate::logic::model::inference::verify_checksum;
use crate::logic::model::{
    CacheStatus, InferenceError, LoadedModel, ModelCache, ModelLoader, OnnxLoader, PredictionResult, TypePredictor,
    Verdict,
};
use crate::logic::notify::{BatcherStatus, NotificationBatcher, QueuedNotification};
use crate::logic::registry::{ModelRegistry, RegistryError};
use crate::logic::schedule::{Clock, IntervalTicker, SystemClock};
use crate::logic::training::{CommandTrainer, OrchestratorParts, SessionState, Trainer, TrainingOrchestrator};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("Control plane: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}

/// Why a classification could not be served
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("No model loaded")]
    NoModel,
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Result of syncing the cache with the registry selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Loaded(String),
    Unchanged(String),
    /// Selection moved while this reload ran; the newer one wins
    Superseded(String),
    NoModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: &'static str,
    pub version: &'static str,
    pub model: CacheStatus,
    pub training: SessionState,
    pub training_enabled: bool,
    pub type_model_enabled: bool,
    pub notifications: BatcherStatus,
    pub registry_models: usize,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Collaborators, injectable for tests
pub struct ServiceParts {
    pub config: ServiceConfig,
    pub registry: Arc<ModelRegistry>,
    pub loader: Arc<dyn ModelLoader>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub trainer: Option<Arc<dyn Trainer>>,
    pub extractor: FeatureExtractor,
    pub type_predictor: TypePredictor,
    pub clock: Arc<dyn Clock>,
}

pub struct MlService {
    config: ServiceConfig,
    registry: Arc<ModelRegistry>,
    cache: Arc<ModelCache>,
    loader: Arc<dyn ModelLoader>,
    control_plane: Arc<dyn ControlPlane>,
    extractor: Arc<FeatureExtractor>,
    type_predictor: Arc<TypePredictor>,
    batcher: Arc<NotificationBatcher>,
    orchestrator: Arc<TrainingOrchestrator>,
    training_enabled: bool,
    shutdown: CancellationToken,
}

impl MlService {
    /// Production wiring from configuration
    pub fn build(config: ServiceConfig) -> Result<Arc<Self>, ServiceError> {
        let registry = Arc::new(ModelRegistry::open(&config.registry_path(), &config.models_dir)?);
        let control_plane: Arc<dyn ControlPlane> =
            Arc::new(HttpControlPlane::new(&config.control_plane_url, config.http_timeout)?);
        let loader: Arc<dyn ModelLoader> = Arc::new(OnnxLoader);

        let words = match &config.words_dir {
            Some(dir) => BadWords::load(dir),
            None => {
                log::info!("WORDS_DIR not set, using built-in word lists");
                BadWords::builtin()
            }
        };
        let extractor = FeatureExtractor::new(words, config.decode_max_depth);
        let type_predictor = TypePredictor::load(loader.as_ref(), config.type_model_path.as_deref());

        let trainer = config
            .trainer_command
            .as_deref()
            .and_then(CommandTrainer::from_parts)
            .map(|t| Arc::new(t) as Arc<dyn Trainer>);

        Ok(Self::from_parts(ServiceParts {
            config,
            registry,
            loader,
            control_plane,
            trainer,
            extractor,
            type_predictor,
            clock: Arc::new(SystemClock),
        }))
    }

    pub fn from_parts(parts: ServiceParts) -> Arc<Self> {
        let cache = Arc::new(ModelCache::new());
        let extractor = Arc::new(parts.extractor);
        let training_enabled = parts.trainer.is_some();

        if !parts.type_predictor.is_enabled() {
            log::warn!("Threat type model not loaded, anomalies will not be typed");
        }

        let sink = Arc::new(AnalysisSink(parts.control_plane.clone()));
        let batcher = Arc::new(NotificationBatcher::new(parts.config.notify_batch_size, sink));

        let orchestrator = Arc::new(TrainingOrchestrator::new(OrchestratorParts {
            registry: parts.registry.clone(),
            cache: cache.clone(),
            loader: parts.loader.clone(),
            control_plane: parts.control_plane.clone(),
            extractor: extractor.clone(),
            trainer: parts.trainer,
            dataset_dir: parts.config.dataset_dir(),
            baseline_dataset: parts.config.baseline_dataset.clone(),
            clock: parts.clock,
        }));

        Arc::new(Self {
            config: parts.config,
            registry: parts.registry,
            cache,
            loader: parts.loader,
            control_plane: parts.control_plane,
            extractor,
            type_predictor: Arc::new(parts.type_predictor),
            batcher,
            orchestrator,
            training_enabled,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<TrainingOrchestrator> {
        &self.orchestrator
    }

    pub fn batcher(&self) -> &Arc<NotificationBatcher> {
        &self.batcher
    }

    // ------------------------------------------------------------------------
    // Model loading
    // ------------------------------------------------------------------------

    /// Bring the cache in line with the registry's selected record
    ///
    /// Any missing, corrupt or unloadable artifact clears the cache. Both the
    /// install and the clear re-check the selection under the cache lock, so
    /// a promotion landing mid-load is never overwritten.
    pub fn reload_model(&self) -> ReloadOutcome {
        let selected = match self.registry.get_selected() {
            Ok(Some(s)) => s,
            Ok(None) => {
                log::warn!("No selected model in registry");
                self.cache
                    .clear_if(|| matches!(self.registry.get_selected(), Ok(None)));
                return ReloadOutcome::NoModel;
            }
            Err(e) => {
                log::error!("Registry read failed: {}", e);
                self.cache.clear();
                return ReloadOutcome::NoModel;
            }
        };

        if self.cache.current_id().as_deref() == Some(selected.id.as_str()) {
            return ReloadOutcome::Unchanged(selected.id);
        }

        let path = self.registry.artifact_path(&selected.name);
        if !path.is_file() {
            log::warn!("Model file not found: {}", path.display());
            return self.drop_unloadable(&selected.id);
        }

        if let Some(expected) = &selected.artifact_sha256 {
            if let Err(e) = verify_checksum(&path, &selected.name, expected) {
                log::error!("Refusing to load {}: {}", selected.name, e);
                return self.drop_unloadable(&selected.id);
            }
        }

        match self.loader.load(&path) {
            Ok(predictor) => {
                let model = LoadedModel::new(&selected.id, &selected.name, predictor);
                if self.cache.install_if(model, |id| self.registry.is_selected(id)) {
                    log::info!("Loaded model {} ({})", selected.id, selected.name);
                    ReloadOutcome::Loaded(selected.id)
                } else {
                    ReloadOutcome::Superseded(selected.id)
                }
            }
            Err(e) => {
                log::error!("Failed to load model {}: {}", selected.name, e);
                self.drop_unloadable(&selected.id)
            }
        }
    }

    /// Serve nothing rather than a model that is no longer selected
    fn drop_unloadable(&self, selected_id: &str) -> ReloadOutcome {
        if self.cache.clear_if(|| self.registry.is_selected(selected_id)) {
            ReloadOutcome::NoModel
        } else {
            ReloadOutcome::Superseded(selected_id.to_string())
        }
    }

    /// Pull model rows + selection, fetch a missing artifact, reload
    pub async fn refresh_from_control_plane(self: &Arc<Self>) -> Result<ReloadOutcome, ServiceError> {
        let remote_models = self.control_plane.list_models().await?;
        let remote_selected = self.control_plane.selected_model().await?;

        let selected_id = remote_selected
            .as_ref()
            .map(|m| m.id.clone())
            .or_else(|| remote_models.iter().find(|m| m.selected == Some(true)).map(|m| m.id.clone()));

        let mut rows: Vec<_> = remote_models.into_iter().map(|m| m.into_record()).collect();
        if let Some(sel) = remote_selected {
            if !rows.iter().any(|r| r.id == sel.id) {
                rows.push(sel.into_record());
            }
        }

        let synced = self.registry.sync_from_remote(&rows, selected_id.as_deref())?;
        log::info!("Registry refreshed from control plane ({} models)", synced);

        self.ensure_artifact_present().await;

        let this = self.clone();
        let outcome = tokio::task::spawn_blocking(move || this.reload_model())
            .await
            .unwrap_or_else(|e| {
                log::error!("Model reload task failed: {}", e);
                ReloadOutcome::NoModel
            });
        Ok(outcome)
    }

    /// Download the selected model's artifact if it is not on disk
    async fn ensure_artifact_present(&self) {
        let selected = match self.registry.get_selected() {
            Ok(Some(s)) => s,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Registry read failed: {}", e);
                return;
            }
        };

        let path = self.registry.artifact_path(&selected.name);
        if path.is_file() {
            return;
        }

        log::info!("Downloading missing artifact for {} ({})", selected.name, selected.id);
        match self.control_plane.download_artifact(&selected.id).await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, &bytes).await {
                    log::error!("Failed to save artifact {}: {}", path.display(), e);
                } else {
                    log::info!("Saved artifact {} ({} bytes)", path.display(), bytes.len());
                }
            }
            Err(e) => log::warn!("Artifact download failed for {}: {}", selected.id, e),
        }
    }

    /// Startup: sweep leftovers, refresh from the control plane, falling
    /// back to local state
    pub async fn bootstrap(self: &Arc<Self>) -> ReloadOutcome {
        // No session can be running yet
        match self.registry.purge_incomplete_candidates() {
            Ok(purged) if !purged.is_empty() => {
                log::warn!("Removed {} candidate(s) from an interrupted training run", purged.len())
            }
            Ok(_) => {}
            Err(e) => log::warn!("Candidate cleanup failed: {}", e),
        }

        match self.refresh_from_control_plane().await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Control plane unavailable at startup ({}), using local registry", e);
                let this = self.clone();
                tokio::task::spawn_blocking(move || this.reload_model())
                    .await
                    .unwrap_or(ReloadOutcome::NoModel)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------------

    /// Primary classification with the current model
    pub fn classify(&self, request: &RequestDescriptor) -> Result<PredictionResult, ClassifyError> {
        if !self.cache.is_loaded() {
            return Err(ClassifyError::NoModel);
        }
        let features = self.extractor.extract(request, ExtractionMode::Anomaly);
        match self.cache.predict(&features.to_f32()) {
            Some(result) => Ok(result?),
            None => Err(ClassifyError::NoModel),
        }
    }

    /// Secondary classification, detached from the request
    pub fn spawn_type_analysis(self: &Arc<Self>, request_id: String, request: RequestDescriptor) -> Option<JoinHandle<()>> {
        if !self.type_predictor.is_enabled() {
            return None;
        }

        let this = self.clone();
        Some(tokio::spawn(async move {
            let extractor = this.extractor.clone();
            let predictor = this.type_predictor.clone();
            let prediction = tokio::task::spawn_blocking(move || {
                let features = extractor.extract(&request, ExtractionMode::ThreatType);
                predictor.predict(&features.to_f32())
            })
            .await;

            match prediction {
                Ok(Some(p)) => {
                    log::debug!("Request {} typed as {} ({:.2})", request_id, p.threat_type, p.confidence);
                    this.batcher
                        .enqueue(QueuedNotification {
                            request_id,
                            threat_type: p.threat_type.label().to_string(),
                        })
                        .await;
                }
                Ok(None) => log::debug!("No threat type for request {}", request_id),
                Err(e) => log::warn!("Threat type task failed: {}", e),
            }
        }))
    }

    /// Classify and, on an anomaly, queue secondary typing
    pub fn analyze(self: &Arc<Self>, request_id: String, request: RequestDescriptor) -> Result<PredictionResult, ClassifyError> {
        let result = self.classify(&request)?;
        if result.prediction == Verdict::Anomaly {
            self.spawn_type_analysis(request_id, request);
        }
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------------

    /// Spawn scheduler, watcher and flush loop
    pub fn start_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.training_enabled {
            handles.push(tokio::spawn(self.orchestrator.clone().run_scheduler(
                IntervalTicker::new(self.config.train_check_interval),
                self.shutdown.clone(),
            )));
        }

        let watcher = ChangeWatcher::new(self.control_plane.clone());
        let this = self.clone();
        handles.push(tokio::spawn(watcher.run(
            IntervalTicker::new(self.config.watch_interval),
            self.shutdown.clone(),
            move || {
                let this = this.clone();
                async move {
                    if let Err(e) = this.refresh_from_control_plane().await {
                        log::warn!("Refresh after change signal failed: {}", e);
                    }
                }
            },
        )));

        handles.push(tokio::spawn(self.batcher.clone().run_flush_loop(
            IntervalTicker::new(self.config.notify_flush_interval),
            self.shutdown.clone(),
        )));

        log::info!("Background loops started ({} tasks)", handles.len());
        handles
    }

    /// Stop loops, cancel training
    pub fn shutdown(&self) {
        self.orchestrator.cancel();
        self.shutdown.cancel();
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            service: constants::APP_NAME,
            version: constants::APP_VERSION,
            model: self.cache.status(),
            training: self.orchestrator.state(),
            training_enabled: self.training_enabled,
            type_model_enabled: self.type_predictor.is_enabled(),
            notifications: self.batcher.status(),
            registry_models: self.registry.list().map(|l| l.len()).unwrap_or(0),
        }
    }
}
