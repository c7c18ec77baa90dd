use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use thiserror::Error;

use super::job::{JobOutcome, TrainingJob};
use super::layout::ModelLayout;
use super::status::{SlotState, TrainingPhase, TrainingStatus};
use crate::annotations::LabeledImage;
use crate::augment::Augmenter;
use crate::backend::{FitError, FitRequest, ModelBackend, ModelKind};
use crate::cache::{self, ModelCache};
use crate::dataset::{DatasetBuilder, DatasetError, DatasetOptions};
use crate::fs_atomic;
use crate::registry::ClassRegistry;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error("Failed to update {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Knobs shared by every job a controller runs.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub uploads_dir: PathBuf,
    pub dataset: DatasetOptions,
    pub min_artifact_bytes: u64,
}

/// Per-model-type training state machine.
///
/// At most one job runs at a time; `start` never blocks on it.
pub struct TrainingController<B: ModelBackend> {
    backend: Arc<B>,
    layout: ModelLayout,
    augmenter: Arc<dyn Augmenter>,
    settings: ControllerSettings,
    shared: Arc<Mutex<SlotState<B::Model>>>,
}

impl<B: ModelBackend> TrainingController<B> {
    /// Create the controller and probe the workspace for a committed artifact.
    pub fn new(
        backend: B,
        workspace: &Path,
        augmenter: Arc<dyn Augmenter>,
        settings: ControllerSettings,
    ) -> Self {
        let layout = ModelLayout::new(workspace, backend.kind());
        let available = cache::probe(&layout.weights_path(), settings.min_artifact_bytes).is_ok()
            && layout.manifest_path().is_file()
            && layout.registry().path().is_file();
        tracing::info!(
            "{} model {} at {}",
            backend.kind(),
            if available { "available" } else { "not available" },
            layout.root().display()
        );
        Self {
            backend: Arc::new(backend),
            layout,
            augmenter,
            settings,
            shared: Arc::new(Mutex::new(SlotState::probed(available))),
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.backend.kind()
    }

    pub fn layout(&self) -> &ModelLayout {
        &self.layout
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.settings.uploads_dir
    }

    pub fn cache(&self) -> ModelCache<B> {
        ModelCache::new(
            Arc::clone(&self.backend),
            self.layout.clone(),
            Arc::clone(&self.shared),
            self.settings.min_artifact_bytes,
        )
    }

    pub fn status(&self) -> TrainingStatus {
        self.lock().status
    }

    pub fn phase(&self) -> TrainingPhase {
        self.lock().phase
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Start a background job; `false` when one is already running.
    ///
    /// A job made stale by [`reset`](Self::reset) still counts as running until its worker exits.
    pub fn start(&self, images: Vec<LabeledImage>) -> bool {
        self.start_job(images).is_some()
    }

    /// Same as [`start`](Self::start) but hands back a completion handle.
    pub fn start_job(&self, images: Vec<LabeledImage>) -> Option<TrainingJob> {
        let job_id = uuid::Uuid::new_v4().simple().to_string();
        let (revision, previous) = {
            let mut state = self.lock();
            if state.phase.is_running() || state.active_job.is_some() {
                tracing::info!("{} training already running, request ignored", self.kind());
                return None;
            }
            let previous = state.status;
            state.phase = TrainingPhase::Preparing;
            state.status = TrainingStatus {
                training_in_progress: true,
                progress: 0.0,
                is_available: previous.is_available,
                is_ready: false,
            };
            state.last_error = None;
            state.active_job = Some(job_id.clone());
            (state.revision, previous)
        };

        let context = JobContext {
            backend: Arc::clone(&self.backend),
            layout: self.layout.clone(),
            augmenter: Arc::clone(&self.augmenter),
            settings: self.settings.clone(),
            shared: Arc::clone(&self.shared),
            job_id: job_id.clone(),
            revision,
            previous,
        };
        let (done_tx, done_rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("annolab-train-{}", self.kind()))
            .spawn(move || {
                let outcome = context.run(&images);
                let _ = done_tx.send(outcome);
            });
        match spawned {
            Ok(handle) => Some(TrainingJob::new(job_id, handle, done_rx)),
            Err(err) => {
                let mut state = self.lock();
                restore_after_failure(&mut state, previous, format!("Worker spawn failed: {err}"));
                None
            }
        }
    }

    /// Forget the trained model: delete its artifacts and return to the unavailable state.
    ///
    /// The class map is kept so IDs stay stable across a reset. A running job is
    /// left to finish on its own and its output is discarded.
    pub fn reset(&self) -> Result<(), TrainingError> {
        let mut state = self.lock();
        state.revision += 1;
        state.status = TrainingStatus::unavailable();
        state.phase = TrainingPhase::Idle;
        state.cached = None;
        state.last_error = None;
        let weights = self.layout.weights_path();
        let manifest = self.layout.manifest_path();
        let jobs = self.layout.jobs_dir();
        for path in [&weights, &manifest] {
            fs_atomic::remove_if_exists(path).map_err(|source| TrainingError::Io {
                path: path.clone(),
                source,
            })?;
        }
        fs_atomic::remove_dir_if_exists(&jobs).map_err(|source| TrainingError::Io {
            path: jobs.clone(),
            source,
        })?;
        tracing::info!("Reset {} model", self.kind());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<B::Model>> {
        lock_slot(&self.shared)
    }
}

fn lock_slot<M>(shared: &Mutex<SlotState<M>>) -> MutexGuard<'_, SlotState<M>> {
    shared
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn restore_after_failure<M>(state: &mut SlotState<M>, previous: TrainingStatus, message: String) {
    state.phase = TrainingPhase::Failed;
    state.status = TrainingStatus {
        training_in_progress: false,
        ..previous
    };
    state.last_error = Some(message);
    state.active_job = None;
}

/// Everything the worker thread owns for one job.
struct JobContext<B: ModelBackend> {
    backend: Arc<B>,
    layout: ModelLayout,
    augmenter: Arc<dyn Augmenter>,
    settings: ControllerSettings,
    shared: Arc<Mutex<SlotState<B::Model>>>,
    job_id: String,
    revision: u64,
    previous: TrainingStatus,
}

impl<B: ModelBackend> JobContext<B> {
    fn run(self, images: &[LabeledImage]) -> JobOutcome {
        let kind = self.backend.kind();
        tracing::info!("{kind} training job {} started on {} images", self.job_id, images.len());
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(images)))
            .unwrap_or_else(|payload| Err(FitError::Panicked(panic_message(payload)).into()));
        match result {
            Ok(Some(artifact)) => {
                tracing::info!("{kind} training job {} ready", self.job_id);
                JobOutcome::Ready { artifact }
            }
            Ok(None) => JobOutcome::Stale,
            Err(err) => {
                let message = err.to_string();
                let mut state = lock_slot(&self.shared);
                if state.revision != self.revision {
                    drop(state);
                    self.discard();
                    return JobOutcome::Stale;
                }
                tracing::error!("{kind} training job {} failed: {message}", self.job_id);
                restore_after_failure(&mut state, self.previous, message.clone());
                JobOutcome::Failed(message)
            }
        }
    }

    /// `Ok(None)` means the job went stale and its output was dropped.
    fn execute(&self, images: &[LabeledImage]) -> Result<Option<PathBuf>, TrainingError> {
        let registry = self.seed_registry()?;
        let builder = DatasetBuilder::new(
            self.settings.uploads_dir.clone(),
            self.layout.job_dataset_dir(&self.job_id),
            registry,
            Arc::clone(&self.augmenter),
            self.settings.dataset.clone(),
        );
        let prepared = builder.prepare(images)?;
        if !self.enter_phase(TrainingPhase::Fitting) {
            self.discard();
            return Ok(None);
        }

        let canonical = self.layout.weights_path();
        let request = FitRequest {
            manifest_path: prepared.manifest_path.clone(),
            manifest: prepared.manifest.clone(),
            output_dir: self.layout.job_dir(&self.job_id),
            previous_weights: canonical.is_file().then_some(canonical),
        };
        let artifact = self
            .backend
            .fit(&request, &|value: f32| self.report_progress(value))?;
        cache::probe(&artifact, self.settings.min_artifact_bytes).map_err(|err| {
            FitError::Io {
                path: artifact.clone(),
                source: std::io::Error::other(err.to_string()),
            }
        })?;
        self.commit(&artifact, &prepared.manifest_path)
    }

    /// The job extends its own copy of the class map; only a commit publishes it.
    fn seed_registry(&self) -> Result<ClassRegistry, TrainingError> {
        let canonical = self.layout.registry();
        let local = self.layout.job_registry(&self.job_id);
        if canonical.path().is_file() {
            fs_atomic::stage_copy(canonical.path(), local.path())
                .and_then(fs_atomic::StagedFile::commit)
                .map_err(|source| TrainingError::Io {
                    path: local.path().to_path_buf(),
                    source,
                })?;
        }
        Ok(local)
    }

    fn enter_phase(&self, phase: TrainingPhase) -> bool {
        let mut state = lock_slot(&self.shared);
        if state.revision != self.revision {
            return false;
        }
        state.phase = phase;
        true
    }

    fn report_progress(&self, value: f32) {
        if !value.is_finite() {
            return;
        }
        let mut state = lock_slot(&self.shared);
        if state.revision == self.revision && state.status.training_in_progress {
            state.status.progress = state.status.progress.max(value.clamp(0.0, 1.0));
        }
    }

    /// Stage the canonical files outside the lock, then rename them under it.
    fn commit(&self, artifact: &Path, manifest: &Path) -> Result<Option<PathBuf>, TrainingError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TrainingError::Io { path, source }
        };
        let weights_dest = self.layout.weights_path();
        let manifest_dest = self.layout.manifest_path();
        let registry_dest = self.layout.registry().path().to_path_buf();
        let staged_registry = fs_atomic::stage_copy(
            self.layout.job_registry(&self.job_id).path(),
            &registry_dest,
        )
        .map_err(io_err(&registry_dest))?;
        let staged_manifest =
            fs_atomic::stage_copy(manifest, &manifest_dest).map_err(io_err(&manifest_dest))?;
        let staged_weights =
            fs_atomic::stage_copy(artifact, &weights_dest).map_err(io_err(&weights_dest))?;

        let mut state = lock_slot(&self.shared);
        if state.revision != self.revision {
            drop(state);
            self.discard();
            return Ok(None);
        }
        staged_registry.commit().map_err(io_err(&registry_dest))?;
        staged_manifest
            .commit()
            .map_err(io_err(&manifest_dest))?;
        staged_weights.commit().map_err(io_err(&weights_dest))?;
        state.revision += 1;
        state.cached = None;
        state.phase = TrainingPhase::Ready;
        state.status = TrainingStatus {
            training_in_progress: false,
            progress: 1.0,
            is_available: true,
            is_ready: true,
        };
        state.active_job = None;
        drop(state);

        for dir in self.layout.other_job_dirs(&self.job_id) {
            if let Err(err) = fs_atomic::remove_dir_if_exists(&dir) {
                tracing::warn!("Failed to prune old job {}: {err}", dir.display());
            }
        }
        Ok(Some(artifact.to_path_buf()))
    }

    /// Drop a stale job's output, then release the slot so a new job may start.
    fn discard(&self) {
        tracing::info!(
            "{} training job {} went stale, discarding its output",
            self.backend.kind(),
            self.job_id
        );
        if let Err(err) = fs_atomic::remove_dir_if_exists(&self.layout.job_dir(&self.job_id)) {
            tracing::warn!("Failed to remove stale job {}: {err}", self.job_id);
        }
        let mut state = lock_slot(&self.shared);
        if state.active_job.as_deref() == Some(self.job_id.as_str()) {
            state.active_job = None;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
