//! Lazily loaded, memoized model artifacts.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::backend::ModelBackend;
use crate::registry::{ClassMap, RegistryError};
use crate::training::ModelLayout;
use crate::training::status::SlotState;

/// Artifacts smaller than this are treated as truncated writes.
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 64;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Model is not ready")]
    NotReady,
    #[error("No model artifact found under {0}")]
    Missing(PathBuf),
    #[error("Model artifact {path} is {size} bytes (minimum {min})")]
    Undersized { path: PathBuf, size: u64, min: u64 },
    #[error("Model artifact {path} is unusable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error(transparent)]
    ClassMap(#[from] RegistryError),
}

/// A loaded model together with the class mapping its IDs refer to.
#[derive(Debug)]
pub struct CachedModel<M> {
    pub weights: M,
    pub source_path: PathBuf,
    pub class_map: ClassMap,
}

/// Read side of a controller's model slot.
pub struct ModelCache<B: ModelBackend> {
    backend: Arc<B>,
    layout: ModelLayout,
    shared: Arc<Mutex<SlotState<B::Model>>>,
    min_artifact_bytes: u64,
}

impl<B: ModelBackend> Clone for ModelCache<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            layout: self.layout.clone(),
            shared: Arc::clone(&self.shared),
            min_artifact_bytes: self.min_artifact_bytes,
        }
    }
}

impl<B: ModelBackend> ModelCache<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        layout: ModelLayout,
        shared: Arc<Mutex<SlotState<B::Model>>>,
        min_artifact_bytes: u64,
    ) -> Self {
        Self {
            backend,
            layout,
            shared,
            min_artifact_bytes,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve the active artifact and return its loaded handle.
    ///
    /// The lock is only held to snapshot and to install; probing and
    /// deserialization happen without it.
    pub fn load(&self) -> Result<Arc<CachedModel<B::Model>>, CacheError> {
        let (revision, memo) = {
            let state = self.lock();
            if state.status.training_in_progress || !state.status.is_ready {
                return Err(CacheError::NotReady);
            }
            (state.revision, state.cached.clone())
        };

        let mut last_error = CacheError::Missing(self.layout.root().to_path_buf());
        for path in self.layout.artifact_candidates() {
            if let Err(err) = probe(&path, self.min_artifact_bytes) {
                if !matches!(err, CacheError::Missing(_)) {
                    tracing::warn!("Skipping artifact candidate: {err}");
                }
                last_error = err;
                continue;
            }
            if let Some(memo) = memo.as_ref().filter(|memo| memo.source_path == path) {
                tracing::debug!("Model cache hit for {}", path.display());
                return Ok(Arc::clone(memo));
            }
            let weights = match self.backend.load(&path) {
                Ok(weights) => weights,
                Err(err) => {
                    tracing::warn!("Skipping artifact candidate: {err}");
                    last_error = err;
                    continue;
                }
            };
            let class_map = self.layout.registry().load()?;
            let loaded = Arc::new(CachedModel {
                weights,
                source_path: path,
                class_map,
            });
            let mut state = self.lock();
            if state.revision != revision {
                return Err(CacheError::NotReady);
            }
            state.cached = Some(Arc::clone(&loaded));
            tracing::info!(
                "Loaded {} model from {}",
                self.backend.kind(),
                loaded.source_path.display()
            );
            return Ok(loaded);
        }
        Err(last_error)
    }

    /// Drop the memoized handle; the next `load` re-reads from disk.
    pub fn clear(&self) {
        self.lock().cached = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().cached.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<B::Model>> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Existence and size check for one candidate.
pub fn probe(path: &std::path::Path, min_bytes: u64) -> Result<u64, CacheError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        _ => return Err(CacheError::Missing(path.to_path_buf())),
    };
    let size = meta.len();
    if size < min_bytes {
        return Err(CacheError::Undersized {
            path: path.to_path_buf(),
            size,
            min: min_bytes,
        });
    }
    Ok(size)
}
