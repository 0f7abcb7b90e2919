//! Training Module - Single-flight retraining with rollback rules
//!
//! # Architecture
//! - `decision.rs`: pure accept/reject rule
//! - `naming.rs`: candidate version names
//! - `trainer.rs`: opaque trainer seam (`CommandTrainer` by default)
//!
//! # Session flow
//! snapshot selected → fetch labelled log → insert candidate row → train
//! (blocking pool) → cancelled? → selection changed? → decide → accept
//! (promote, swap cache, drop old artifact) or discard the candidate.
//! Nothing here can take the serving path down: every failure ends the
//! session and leaves the selected model alone.

pub mod decision;
pub mod naming;
pub mod trainer;
#[cfg(test)]
mod tests;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::logic::control_plane::{ControlPlane, ControlPlaneError, ModelResults};
use crate::logic::dataset::{self, DatasetWriter};
use crate::logic::features::{ExtractionMode, FeatureExtractor};
use crate::logic::model::inference::artifact_sha256;
use crate::logic::model::{InferenceError, LoadedModel, ModelCache, ModelLoader};
use crate::logic::registry::{Metrics, ModelRecord, ModelRegistry, RegistryError};
use crate::logic::schedule::{is_due, Clock, Ticker};

pub use decision::{decide, Decision, RejectReason};
pub use trainer::{CommandTrainer, Trainer, TrainingJob};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Control plane: {0}")]
    ControlPlane(#[from] ControlPlaneError),
    #[error("Registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Trainer failed: {0}")]
    Trainer(String),
    #[error("Invalid metrics: {0}")]
    InvalidMetrics(String),
    #[error("Trainer produced no artifact at {0}")]
    MissingArtifact(PathBuf),
    #[error("Candidate failed to load: {0}")]
    Load(#[from] InferenceError),
    #[error("Training task panicked: {0}")]
    Panicked(String),
    #[error("No training data available")]
    EmptyDataset,
    #[error("Candidate naming: {0}")]
    Naming(#[from] naming::NamingError<RegistryError>),
}

// ============================================================================
// SESSION STATE
// ============================================================================

/// Terminal state of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Accepted { model_id: String, name: String },
    Rejected { name: String, reason: RejectReason },
    DiscardedInterrupted,
    DiscardedSuperseded,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running {
        predecessor_id: String,
        started_at: DateTime<Utc>,
    },
    Finished {
        outcome: SessionOutcome,
        finished_at: DateTime<Utc>,
    },
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Everything a session needs, shared with the spawned task
struct Inner {
    registry: Arc<ModelRegistry>,
    cache: Arc<ModelCache>,
    loader: Arc<dyn ModelLoader>,
    control_plane: Arc<dyn ControlPlane>,
    extractor: Arc<FeatureExtractor>,
    trainer: Option<Arc<dyn Trainer>>,
    dataset_dir: PathBuf,
    baseline_dataset: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    state_tx: watch::Sender<SessionState>,
}

pub struct TrainingOrchestrator {
    inner: Arc<Inner>,
    /// Held by the running session
    flight: Arc<tokio::sync::Mutex<()>>,
    cancel: Mutex<CancellationToken>,
}

pub struct OrchestratorParts {
    pub registry: Arc<ModelRegistry>,
    pub cache: Arc<ModelCache>,
    pub loader: Arc<dyn ModelLoader>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub extractor: Arc<FeatureExtractor>,
    pub trainer: Option<Arc<dyn Trainer>>,
    pub dataset_dir: PathBuf,
    /// Merged with the (balanced) fresh log when set
    pub baseline_dataset: Option<PathBuf>,
    pub clock: Arc<dyn Clock>,
}

impl TrainingOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        if parts.trainer.is_none() {
            log::warn!("No trainer configured, automatic retraining disabled");
        }
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(Inner {
                registry: parts.registry,
                cache: parts.cache,
                loader: parts.loader,
                control_plane: parts.control_plane,
                extractor: parts.extractor,
                trainer: parts.trainer,
                dataset_dir: parts.dataset_dir,
                baseline_dataset: parts.baseline_dataset,
                clock: parts.clock,
                state_tx,
            }),
            flight: Arc::new(tokio::sync::Mutex::new(())),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Session state updates
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.flight.try_lock().is_err()
    }

    /// Ask the running session (if any) to discard its result
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Start a session if training is due and none is running
    ///
    /// Returns the session handle, or `None` when nothing was started.
    pub fn maybe_train(&self) -> Option<JoinHandle<SessionOutcome>> {
        let trainer = self.inner.trainer.clone()?;

        let selected = match self.inner.registry.get_selected() {
            Ok(Some(s)) => s,
            Ok(None) => {
                log::debug!("No selected model, nothing to retrain");
                return None;
            }
            Err(e) => {
                log::warn!("Training check failed: {}", e);
                return None;
            }
        };

        if !is_due(&selected, self.inner.clock.now()) {
            log::debug!("Training not due for {}", selected.name);
            return None;
        }

        let permit = match self.flight.clone().try_lock_owned() {
            Ok(p) => p,
            Err(_) => {
                log::info!("Training already in progress. Skipping.");
                return None;
            }
        };

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        log::info!("Starting training session (current model: {})", selected.name);
        self.inner.state_tx.send_replace(SessionState::Running {
            predecessor_id: selected.id.clone(),
            started_at: Utc::now(),
        });

        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            let outcome = inner.run_session(selected, trainer, token).await;
            inner.state_tx.send_replace(SessionState::Finished {
                outcome: outcome.clone(),
                finished_at: Utc::now(),
            });
            drop(permit);
            outcome
        }))
    }

    /// Check due-ness on every tick until shutdown
    pub async fn run_scheduler(self: Arc<Self>, mut ticker: impl Ticker, shutdown: CancellationToken) {
        log::info!("Training scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                more = ticker.tick() => {
                    if !more {
                        break;
                    }
                    // Session runs detached; the handle is only for callers that wait
                    let _ = self.maybe_train();
                }
            }
        }
        self.cancel();
        log::info!("Training scheduler stopped");
    }
}

impl Inner {
    async fn run_session(
        &self,
        old: ModelRecord,
        trainer: Arc<dyn Trainer>,
        token: CancellationToken,
    ) -> SessionOutcome {
        // Labelled log first: nothing to clean up if it fails
        let requests = match self.control_plane.fetch_requests().await {
            Ok(r) if r.is_empty() => return self.failed(TrainingError::EmptyDataset),
            Ok(r) => r,
            Err(e) => return self.failed(e.into()),
        };

        let name = match naming::next_candidate_name(Some(&old.name), |n| self.registry.record_exists(n)) {
            Ok(name) => name,
            Err(e) => return self.failed(e.into()),
        };
        let candidate = ModelRecord::candidate(name, Some(&old));
        if let Err(e) = self.registry.insert(&candidate) {
            return self.failed(e.into());
        }
        log::info!("Training candidate {} ({} labelled requests)", candidate.name, requests.len());

        // Dataset + training on the blocking pool
        let job = TrainingJob {
            dataset: PathBuf::new(),
            output: self.registry.artifact_path(&candidate.name),
            rows: requests.len(),
        };
        let extractor = self.extractor.clone();
        let balance = self.baseline_dataset.is_some();
        let writer = DatasetWriter::from_path(self.dataset_dir.clone()).with_baseline(self.baseline_dataset.clone());
        let blocking = tokio::task::spawn_blocking(move || -> Result<(Metrics, TrainingJob), TrainingError> {
            let mut rows = dataset::build_rows(&extractor, &requests);
            if balance {
                rows = dataset::balance_rows(rows, dataset::NORMAL_PER_ANOMALY);
            }
            let file = writer.write_csv(extractor.layout(ExtractionMode::Anomaly), &rows)?;
            let job = TrainingJob {
                dataset: file.path,
                rows: file.rows,
                ..job
            };
            let metrics = trainer.train(&job)?;
            trainer::validate_metrics(&metrics)?;
            trainer::ensure_artifact(&job.output)?;
            Ok((metrics, job))
        });

        let (metrics, job) = match blocking.await {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                self.discard(&candidate);
                return self.failed(e);
            }
            Err(join) => {
                self.discard(&candidate);
                return self.failed(TrainingError::Panicked(join.to_string()));
            }
        };

        if token.is_cancelled() {
            self.discard(&candidate);
            log::info!("Training interrupted, candidate {} discarded", candidate.name);
            return SessionOutcome::DiscardedInterrupted;
        }

        let current = match self.registry.get_selected() {
            Ok(c) => c,
            Err(e) => {
                self.discard(&candidate);
                return self.failed(e.into());
            }
        };
        let Some(current) = current.filter(|c| c.id == old.id) else {
            self.discard(&candidate);
            log::info!("Selection changed mid-training, candidate {} discarded", candidate.name);
            return SessionOutcome::DiscardedSuperseded;
        };

        if token.is_cancelled() {
            self.discard(&candidate);
            log::info!("Training interrupted, candidate {} discarded", candidate.name);
            return SessionOutcome::DiscardedInterrupted;
        }

        let decision = decide(&metrics, Some(&current));
        if let Some(reason) = decision.reason {
            self.discard(&candidate);
            if let Err(e) = self.registry.mark_trained(&old.id, self.clock.now()) {
                log::warn!("Could not stamp training time on {}: {}", old.id, e);
            }
            log::info!(
                "Candidate {} rejected: {} (accuracy {:.2} vs old {:.2}, expected {:.2})",
                candidate.name,
                reason,
                decision.comparison.accuracy.new,
                decision.comparison.accuracy.old,
                decision.comparison.accuracy.expected
            );
            return SessionOutcome::Rejected {
                name: candidate.name,
                reason,
            };
        }

        match self.promote(&candidate, &current, &metrics, &job).await {
            Ok(()) => SessionOutcome::Accepted {
                model_id: candidate.id,
                name: candidate.name,
            },
            Err(TrainingError::Registry(RegistryError::Superseded { found, .. })) => {
                self.discard(&candidate);
                log::info!(
                    "Selection moved to {:?} before acceptance, candidate {} discarded",
                    found,
                    candidate.name
                );
                SessionOutcome::DiscardedSuperseded
            }
            Err(e) => {
                self.discard(&candidate);
                self.failed(e)
            }
        }
    }

    /// Load, promote, swap, clean up, report
    async fn promote(
        &self,
        candidate: &ModelRecord,
        old: &ModelRecord,
        metrics: &Metrics,
        job: &TrainingJob,
    ) -> Result<(), TrainingError> {
        let path = job.output.clone();
        let loader = self.loader.clone();
        let (predictor, sha) = tokio::task::spawn_blocking(move || -> Result<_, TrainingError> {
            let sha = artifact_sha256(&path)?;
            let predictor = loader.load(&path)?;
            Ok((predictor, sha))
        })
        .await
        .map_err(|e| TrainingError::Panicked(e.to_string()))??;

        self.registry
            .accept(&candidate.id, metrics, Some(&sha), job.rows as u64, Some(&old.id))?;

        let model = LoadedModel::new(&candidate.id, &candidate.name, predictor);
        let installed = self.cache.install_if(model, |id| self.registry.is_selected(id));
        if !installed {
            log::warn!("Selection moved right after accepting {}, cache left to the reload path", candidate.name);
        }

        if let Err(e) = self.registry.delete_artifact(&old.name) {
            log::warn!("Could not delete old artifact {}: {}", old.name, e);
        }
        log::info!("Model {} accepted, replacing {}", candidate.name, old.name);

        let [accuracy, precision, recall, f1] = metrics.as_percent().map(round2);
        let results = ModelResults {
            id: old.id.clone(),
            accuracy,
            precision,
            recall,
            f1,
            model_type: candidate.name.clone(),
        };
        if let Err(e) = self.control_plane.post_results(&results).await {
            log::warn!("Model accepted but results not reported: {}", e);
        }
        Ok(())
    }

    /// Remove a candidate's row and artifact
    fn discard(&self, candidate: &ModelRecord) {
        if let Err(e) = self.registry.delete(&candidate.id) {
            log::warn!("Could not delete candidate row {}: {}", candidate.id, e);
            if let Err(e) = self.registry.delete_artifact(&candidate.name) {
                log::warn!("Could not delete candidate artifact {}: {}", candidate.name, e);
            }
        }
    }

    fn failed(&self, error: TrainingError) -> SessionOutcome {
        log::error!("Training failed: {}", error);
        SessionOutcome::Failed { error: error.to_string() }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
