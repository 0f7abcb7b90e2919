use super::*;
use crate::logic::control_plane::fake::FakeControlPlane;
use crate::logic::control_plane::LabelledRequest;
use crate::logic::features::BadWords;
use crate::logic::model::cache::test_support::{fixed_model, StubLoader};
use crate::logic::model::Predictor;
use crate::logic::registry::Thresholds;
use crate::logic::schedule::test_support::ManualClock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use tempfile::TempDir;

// ============================================================================
// FIXTURES
// ============================================================================

/// Writes the artifact and returns fixed metrics; optionally waits on a gate
struct ScriptedTrainer {
    result: Result<Metrics, String>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
    calls: AtomicUsize,
}

impl ScriptedTrainer {
    fn new(result: Result<Metrics, String>) -> Self {
        Self {
            result,
            gate: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    fn gated(result: Result<Metrics, String>) -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel();
        let trainer = Self::new(result);
        *trainer.gate.lock() = Some(rx);
        (tx, trainer)
    }
}

impl Trainer for ScriptedTrainer {
    fn train(&self, job: &TrainingJob) -> Result<Metrics, TrainingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(job.dataset.is_file());
        if let Some(rx) = self.gate.lock().as_ref() {
            let _ = rx.recv();
        }
        std::fs::write(&job.output, b"candidate").map_err(TrainingError::Io)?;
        self.result.clone().map_err(TrainingError::Trainer)
    }
}

/// Operator switches the selection while the candidate is being loaded
struct SwitchingLoader(Arc<ModelRegistry>);

impl ModelLoader for SwitchingLoader {
    fn load(&self, path: &std::path::Path) -> Result<Box<dyn Predictor>, InferenceError> {
        self.0.insert(&ModelRecord::new("other", "operator_pick")).unwrap();
        self.0.promote("other").unwrap();
        StubLoader(vec![0.2, 0.8]).load(path)
    }
}

struct Fixture {
    _dir: TempDir,
    registry: Arc<ModelRegistry>,
    cache: Arc<ModelCache>,
    plane: Arc<FakeControlPlane>,
    orchestrator: TrainingOrchestrator,
}

const OLD_NAME: &str = "rf_v.0.1.0";

fn metrics(v: f64) -> Metrics {
    Metrics::new(v, v, v, v)
}

fn fixture(trainer: Arc<ScriptedTrainer>) -> Fixture {
    fixture_with_loader(trainer, |_| Arc::new(StubLoader(vec![0.2, 0.8])))
}

fn fixture_with_loader(
    trainer: Arc<ScriptedTrainer>,
    loader: impl FnOnce(Arc<ModelRegistry>) -> Arc<dyn ModelLoader>,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(
        ModelRegistry::open(&dir.path().join("models.db"), &dir.path().join("models")).unwrap(),
    );

    let mut old = ModelRecord::new("old", OLD_NAME);
    old.metrics = Some(metrics(0.90));
    old.expected = Some(Thresholds::new(95.0, 95.0, 95.0, 95.0));
    old.train_every = Some(10.0);
    registry.insert(&old).unwrap();
    registry.promote("old").unwrap();
    std::fs::write(registry.artifact_path(OLD_NAME), b"old").unwrap();

    let cache = Arc::new(ModelCache::new());
    cache.install(fixed_model("old", vec![0.9, 0.1]));

    let plane = Arc::new(FakeControlPlane::default());
    *plane.requests.lock() = vec![
        serde_json::from_str::<LabelledRequest>(r#"{"url": "/", "label": 0}"#).unwrap(),
        serde_json::from_str::<LabelledRequest>(r#"{"url": "/?id=1' or '1'='1", "label": 1}"#).unwrap(),
    ];

    let orchestrator = TrainingOrchestrator::new(OrchestratorParts {
        registry: registry.clone(),
        cache: cache.clone(),
        loader: loader(registry.clone()),
        control_plane: plane.clone(),
        extractor: Arc::new(FeatureExtractor::new(BadWords::builtin(), 3)),
        trainer: Some(trainer),
        dataset_dir: dir.path().join("dataset"),
        baseline_dataset: None,
        clock: Arc::new(ManualClock::new(Utc::now())),
    });

    Fixture {
        _dir: dir,
        registry,
        cache,
        plane,
        orchestrator,
    }
}

fn only_old_row(f: &Fixture) {
    let rows = f.registry.list().unwrap();
    assert_eq!(rows.len(), 1, "candidate row must be gone: {:?}", rows);
    assert_eq!(rows[0].id, "old");
    assert!(!f.registry.artifact_path("rf_v.0.1.1").exists());
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_accepted_candidate_is_promoted() {
    let trainer = Arc::new(ScriptedTrainer::new(Ok(metrics(0.96))));
    let f = fixture(trainer);

    let outcome = f.orchestrator.maybe_train().unwrap().await.unwrap();
    let SessionOutcome::Accepted { model_id, name } = outcome else {
        panic!("expected acceptance, got {:?}", outcome);
    };
    assert_eq!(name, "rf_v.0.1.1");

    let selected = f.registry.get_selected().unwrap().unwrap();
    assert_eq!(selected.id, model_id);
    assert_eq!(selected.predecessor_id.as_deref(), Some("old"));
    assert_eq!(selected.requests_used, 2);
    assert!(selected.artifact_sha256.is_some());

    // Old row kept for history, old artifact gone
    assert!(!f.registry.get("old").unwrap().unwrap().selected);
    assert!(!f.registry.artifact_path(OLD_NAME).exists());
    assert!(f.registry.artifact_path("rf_v.0.1.1").exists());

    assert_eq!(f.cache.current_id(), Some(model_id));

    let results = f.plane.results.lock();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "old");
    assert_eq!(results[0].accuracy, 96.0);
    assert_eq!(results[0].model_type, "rf_v.0.1.1");

    assert!(matches!(f.orchestrator.state(), SessionState::Finished { .. }));
}

#[tokio::test]
async fn test_rejected_candidate_is_deleted() {
    let trainer = Arc::new(ScriptedTrainer::new(Ok(Metrics::new(0.94, 0.96, 0.96, 0.96))));
    let f = fixture(trainer);

    let outcome = f.orchestrator.maybe_train().unwrap().await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Rejected {
            name: "rf_v.0.1.1".into(),
            reason: RejectReason::BelowThreshold,
        }
    );

    only_old_row(&f);
    assert!(f.registry.get_selected().unwrap().unwrap().last_trained_at.is_some());
    assert!(f.registry.artifact_path(OLD_NAME).exists());
    assert_eq!(f.cache.current_id().as_deref(), Some("old"));
    assert!(f.plane.results.lock().is_empty());

    // Stamped: not due again right away
    assert!(f.orchestrator.maybe_train().is_none());
}

#[tokio::test]
async fn test_trainer_failure_leaves_serving_alone() {
    let trainer = Arc::new(ScriptedTrainer::new(Err("out of memory".into())));
    let f = fixture(trainer);

    let outcome = f.orchestrator.maybe_train().unwrap().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Failed { .. }));

    only_old_row(&f);
    let selected = f.registry.get_selected().unwrap().unwrap();
    assert_eq!(selected.id, "old");
    assert!(selected.last_trained_at.is_none());
    assert_eq!(f.cache.current_id().as_deref(), Some("old"));
}

#[tokio::test]
async fn test_control_plane_down_fails_before_candidate() {
    let trainer = Arc::new(ScriptedTrainer::new(Ok(metrics(0.99))));
    let f = fixture(trainer.clone());
    f.plane.set_offline(true);

    let outcome = f.orchestrator.maybe_train().unwrap().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Failed { .. }));
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 0);
    only_old_row(&f);
}

#[tokio::test]
async fn test_single_flight() {
    let (release, trainer) = ScriptedTrainer::gated(Ok(metrics(0.96)));
    let trainer = Arc::new(trainer);
    let f = fixture(trainer.clone());

    let first = f.orchestrator.maybe_train();
    let second = f.orchestrator.maybe_train();
    assert!(first.is_some());
    assert!(second.is_none());
    assert!(f.orchestrator.is_running());

    release.send(()).unwrap();
    first.unwrap().await.unwrap();

    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
    assert!(!f.orchestrator.is_running());
}

#[tokio::test]
async fn test_cancellation_discards_candidate() {
    let (release, trainer) = ScriptedTrainer::gated(Ok(metrics(0.99)));
    let f = fixture(Arc::new(trainer));

    let handle = f.orchestrator.maybe_train().unwrap();
    f.orchestrator.cancel();
    release.send(()).unwrap();

    assert_eq!(handle.await.unwrap(), SessionOutcome::DiscardedInterrupted);
    only_old_row(&f);
    assert_eq!(f.registry.get_selected().unwrap().unwrap().id, "old");
    assert_eq!(f.cache.current_id().as_deref(), Some("old"));
}

#[tokio::test]
async fn test_superseded_selection_is_respected() {
    let (release, trainer) = ScriptedTrainer::gated(Ok(metrics(0.99)));
    let f = fixture(Arc::new(trainer));

    let handle = f.orchestrator.maybe_train().unwrap();

    // Operator picks another model mid-run
    f.registry.insert(&ModelRecord::new("other", "operator_pick")).unwrap();
    f.registry.promote("other").unwrap();
    release.send(()).unwrap();

    assert_eq!(handle.await.unwrap(), SessionOutcome::DiscardedSuperseded);

    let selected = f.registry.get_selected().unwrap().unwrap();
    assert_eq!(selected.id, "other");
    assert!(selected.metrics.is_none());
    assert_eq!(f.registry.list().unwrap().len(), 2);
    assert!(!f.registry.artifact_path("rf_v.0.1.1").exists());
}

#[tokio::test]
async fn test_selection_moved_during_load_is_respected() {
    let trainer = Arc::new(ScriptedTrainer::new(Ok(metrics(0.99))));
    let f = fixture_with_loader(trainer, |registry| Arc::new(SwitchingLoader(registry)));

    assert_eq!(
        f.orchestrator.maybe_train().unwrap().await.unwrap(),
        SessionOutcome::DiscardedSuperseded
    );

    assert_eq!(f.registry.get_selected().unwrap().unwrap().id, "other");
    assert!(!f.registry.record_exists("rf_v.0.1.1").unwrap());
    assert!(!f.registry.artifact_path("rf_v.0.1.1").exists());
    assert!(f.registry.artifact_path(OLD_NAME).exists());
    assert_eq!(f.cache.current_id().as_deref(), Some("old"));
    assert!(f.plane.results.lock().is_empty());
}

#[tokio::test]
async fn test_not_due_or_unconfigured() {
    let trainer = Arc::new(ScriptedTrainer::new(Ok(metrics(0.99))));
    let f = fixture(trainer);
    f.registry.mark_trained("old", Utc::now()).unwrap();
    assert!(f.orchestrator.maybe_train().is_none());

    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModelRegistry::open_in_memory(dir.path()).unwrap());
    let idle = TrainingOrchestrator::new(OrchestratorParts {
        registry,
        cache: Arc::new(ModelCache::new()),
        loader: Arc::new(StubLoader(vec![1.0])),
        control_plane: Arc::new(FakeControlPlane::default()),
        extractor: Arc::new(FeatureExtractor::new(BadWords::builtin(), 3)),
        trainer: None,
        dataset_dir: dir.path().join("dataset"),
        baseline_dataset: None,
        clock: Arc::new(ManualClock::new(Utc::now())),
    });
    assert!(idle.maybe_train().is_none());
    assert_eq!(idle.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_scheduler_runs_due_training() {
    let trainer = Arc::new(ScriptedTrainer::new(Ok(metrics(0.96))));
    let f = fixture(trainer.clone());
    let orchestrator = Arc::new(f.orchestrator);
    let mut states = orchestrator.subscribe();

    let (tick, ticker) = crate::logic::schedule::ManualTicker::new();
    let scheduler = tokio::spawn(orchestrator.clone().run_scheduler(ticker, CancellationToken::new()));
    tick.send(()).unwrap();

    // Wait for the session to finish
    loop {
        states.changed().await.unwrap();
        if matches!(*states.borrow(), SessionState::Finished { .. }) {
            break;
        }
    }
    drop(tick);
    scheduler.await.unwrap();

    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
    assert_ne!(f.registry.get_selected().unwrap().unwrap().id, "old");
}
