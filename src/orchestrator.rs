//! Front door tying both model types together.
//!
//! Each model type owns one [`TrainingController`]; an [`Orchestrator`]
//! routes every request to the right one by [`ModelKind`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::annotations::LabeledImage;
use crate::augment::{AugmentOptions, Augmenter, ImageAugmenter};
use crate::backend::ModelKind;
use crate::config::{ConfigError, OrchestratorConfig};
use crate::consistency::{self, ConsistencyError, ConsistencyReport, RepairSummary};
use crate::dataset::{DatasetManifest, ManifestError};
use crate::inference::BatchInference;
use crate::models::{FewShotClassifier, PatchDetector};
use crate::prediction::Prediction;
use crate::registry::RegistryError;
use crate::training::{
    ControllerSettings, ModelLayout, TrainingController, TrainingError, TrainingJob, TrainingPhase,
    TrainingStatus,
};
use crate::uncertainty;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("No prepared dataset for the {0} model")]
    NoDataset(ModelKind),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
}

/// Both models' predictions for one image and how much they disagree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertaintyReport {
    pub detector: Vec<Prediction>,
    pub few_shot: Vec<Prediction>,
    pub score: f32,
}

pub struct Orchestrator {
    detector: TrainingController<PatchDetector>,
    few_shot: TrainingController<FewShotClassifier>,
}

impl Orchestrator {
    /// Build both controllers from `config` with the default image augmenter.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let augmenter = ImageAugmenter::new(AugmentOptions {
            seed: config.dataset.seed,
            ..AugmentOptions::default()
        });
        Self::with_augmenter(config, Arc::new(augmenter))
    }

    pub fn with_augmenter(
        config: &OrchestratorConfig,
        augmenter: Arc<dyn Augmenter>,
    ) -> Result<Self, OrchestratorError> {
        let workspace = config.workspace_dir()?;
        let settings = ControllerSettings {
            uploads_dir: config.uploads_dir()?,
            dataset: config.dataset_options(),
            min_artifact_bytes: config.inference.min_artifact_bytes,
        };
        Ok(Self {
            detector: TrainingController::new(
                PatchDetector::new(config.detector_options()),
                &workspace,
                Arc::clone(&augmenter),
                settings.clone(),
            ),
            few_shot: TrainingController::new(
                FewShotClassifier::new(config.few_shot_options()),
                &workspace,
                augmenter,
                settings,
            ),
        })
    }

    pub fn detector(&self) -> &TrainingController<PatchDetector> {
        &self.detector
    }

    pub fn few_shot(&self) -> &TrainingController<FewShotClassifier> {
        &self.few_shot
    }

    /// Kick off background training; `false` when that model is already training.
    pub fn start_training(&self, kind: ModelKind, images: Vec<LabeledImage>) -> bool {
        self.start_training_job(kind, images).is_some()
    }

    pub fn start_training_job(
        &self,
        kind: ModelKind,
        images: Vec<LabeledImage>,
    ) -> Option<TrainingJob> {
        match kind {
            ModelKind::Detector => self.detector.start_job(images),
            ModelKind::FewShot => self.few_shot.start_job(images),
        }
    }

    pub fn status(&self, kind: ModelKind) -> TrainingStatus {
        match kind {
            ModelKind::Detector => self.detector.status(),
            ModelKind::FewShot => self.few_shot.status(),
        }
    }

    pub fn phase(&self, kind: ModelKind) -> TrainingPhase {
        match kind {
            ModelKind::Detector => self.detector.phase(),
            ModelKind::FewShot => self.few_shot.phase(),
        }
    }

    pub fn last_error(&self, kind: ModelKind) -> Option<String> {
        match kind {
            ModelKind::Detector => self.detector.last_error(),
            ModelKind::FewShot => self.few_shot.last_error(),
        }
    }

    /// Predictions keyed by filename; an untrained model yields empty lists.
    pub fn predict(&self, kind: ModelKind, filenames: &[String]) -> BTreeMap<String, Vec<Prediction>> {
        match kind {
            ModelKind::Detector => self.detector_inference().predict(filenames),
            ModelKind::FewShot => self.few_shot_inference().predict(filenames),
        }
    }

    pub fn predict_one(&self, kind: ModelKind, filename: &str) -> Vec<Prediction> {
        match kind {
            ModelKind::Detector => self.detector_inference().predict_one(filename),
            ModelKind::FewShot => self.few_shot_inference().predict_one(filename),
        }
    }

    pub fn compute_uncertainty(&self, filename: &str) -> UncertaintyReport {
        let detector = self.predict_one(ModelKind::Detector, filename);
        let few_shot = self.predict_one(ModelKind::FewShot, filename);
        let score = uncertainty::score(&detector, &few_shot);
        tracing::debug!("Uncertainty for {filename}: {score:.3}");
        UncertaintyReport {
            detector,
            few_shot,
            score,
        }
    }

    pub fn reset(&self, kind: ModelKind) -> Result<(), OrchestratorError> {
        match kind {
            ModelKind::Detector => self.detector.reset()?,
            ModelKind::FewShot => self.few_shot.reset()?,
        }
        Ok(())
    }

    /// Compare the committed dataset of `kind` against its class map.
    pub fn check_consistency(&self, kind: ModelKind) -> Result<ConsistencyReport, OrchestratorError> {
        let layout = self.layout(kind);
        let manifest_path = self.committed_manifest(kind)?;
        let class_map = layout.registry().load()?;
        let manifest = DatasetManifest::load(&manifest_path)?;
        Ok(consistency::check(&manifest, &class_map)?)
    }

    /// Repair the dataset the committed manifest points at.
    pub fn repair_consistency(&self, kind: ModelKind) -> Result<RepairSummary, OrchestratorError> {
        let layout = self.layout(kind);
        let manifest_path = self.committed_manifest(kind)?;
        let class_map = layout.registry().load()?;
        Ok(consistency::repair(&manifest_path, &class_map)?)
    }

    fn committed_manifest(&self, kind: ModelKind) -> Result<PathBuf, OrchestratorError> {
        let path = self.layout(kind).manifest_path();
        if path.is_file() {
            Ok(path)
        } else {
            Err(OrchestratorError::NoDataset(kind))
        }
    }

    fn layout(&self, kind: ModelKind) -> &ModelLayout {
        match kind {
            ModelKind::Detector => self.detector.layout(),
            ModelKind::FewShot => self.few_shot.layout(),
        }
    }

    fn detector_inference(&self) -> BatchInference<PatchDetector> {
        BatchInference::new(self.detector.cache(), self.detector.uploads_dir())
    }

    fn few_shot_inference(&self) -> BatchInference<FewShotClassifier> {
        BatchInference::new(self.few_shot.cache(), self.few_shot.uploads_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(root: &std::path::Path) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.paths.uploads_dir = Some(root.join("uploads"));
        config.paths.workspace_dir = Some(root.join("ws"));
        config
    }

    #[test]
    fn fresh_workspace_is_unavailable_everywhere() {
        let dir = tempdir().unwrap();
        let orchestrator = Orchestrator::from_config(&config(dir.path())).unwrap();
        for kind in ModelKind::ALL {
            assert_eq!(orchestrator.status(kind), TrainingStatus::unavailable());
            assert_eq!(orchestrator.phase(kind), TrainingPhase::Idle);
            assert!(orchestrator.last_error(kind).is_none());
        }
        let preds = orchestrator.predict(ModelKind::Detector, &["a.png".to_string()]);
        assert!(preds["a.png"].is_empty());
    }

    #[test]
    fn uncertainty_without_models_is_maximal() {
        let dir = tempdir().unwrap();
        let orchestrator = Orchestrator::from_config(&config(dir.path())).unwrap();
        let report = orchestrator.compute_uncertainty("a.png");
        assert!(report.detector.is_empty() && report.few_shot.is_empty());
        assert_eq!(report.score, uncertainty::BOTH_EMPTY_SCORE);
    }

    #[test]
    fn consistency_needs_a_committed_dataset() {
        let dir = tempdir().unwrap();
        let orchestrator = Orchestrator::from_config(&config(dir.path())).unwrap();
        assert!(matches!(
            orchestrator.check_consistency(ModelKind::FewShot),
            Err(OrchestratorError::NoDataset(ModelKind::FewShot))
        ));
    }

    #[test]
    fn reset_on_fresh_workspace_is_harmless() {
        let dir = tempdir().unwrap();
        let orchestrator = Orchestrator::from_config(&config(dir.path())).unwrap();
        orchestrator.reset(ModelKind::Detector).unwrap();
        assert!(!orchestrator.status(ModelKind::Detector).is_available);
    }
}
