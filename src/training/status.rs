use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::CachedModel;

/// Snapshot of a model type's training state as reported to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrainingStatus {
    pub training_in_progress: bool,
    pub progress: f32,
    /// A committed artifact exists on disk.
    pub is_available: bool,
    /// The committed artifact may be served.
    pub is_ready: bool,
}

impl TrainingStatus {
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub(crate) fn with_artifact(available: bool) -> Self {
        Self {
            training_in_progress: false,
            progress: if available { 1.0 } else { 0.0 },
            is_available: available,
            is_ready: available,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Idle,
    Preparing,
    Fitting,
    Ready,
    Failed,
}

impl TrainingPhase {
    pub fn is_running(self) -> bool {
        matches!(self, TrainingPhase::Preparing | TrainingPhase::Fitting)
    }
}

/// Everything a controller guards with its single mutex.
pub(crate) struct SlotState<M> {
    pub(crate) status: TrainingStatus,
    pub(crate) phase: TrainingPhase,
    pub(crate) cached: Option<Arc<CachedModel<M>>>,
    pub(crate) last_error: Option<String>,
    /// Bumped by every reset and every committed artifact.
    pub(crate) revision: u64,
    pub(crate) active_job: Option<String>,
}

impl<M> SlotState<M> {
    pub(crate) fn probed(available: bool) -> Self {
        Self {
            status: TrainingStatus::with_artifact(available),
            phase: if available {
                TrainingPhase::Ready
            } else {
                TrainingPhase::Idle
            },
            cached: None,
            last_error: None,
            revision: 0,
            active_job: None,
        }
    }
}
