//! Orchestrator settings persisted as `config.toml` in the app root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs::{self, AppDirError};
use crate::dataset::DatasetOptions;
use crate::fs_atomic;
use crate::models::{DetectorOptions, FewShotOptions};

/// Default filename used to store the orchestrator configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    AppDir(#[from] AppDirError),
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Failed to write config to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub dataset: DatasetSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub inference: InferenceSettings,
}

/// Locations of uploaded images and model workspaces; unset means the app root default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default)]
    pub uploads_dir: Option<PathBuf>,
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
    /// JSON annotation store read by the CLI when `--store` is not given.
    #[serde(default)]
    pub annotations_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSettings {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    #[serde(default = "default_augmentations_per_image")]
    pub augmentations_per_image: usize,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            train_fraction: default_train_fraction(),
            augmentations_per_image: default_augmentations_per_image(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    #[serde(default)]
    pub detector: DetectorTraining,
    #[serde(default)]
    pub few_shot: FewShotTraining,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorTraining {
    #[serde(default = "default_detector_epochs")]
    pub epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_negatives_per_image")]
    pub negatives_per_image: usize,
}

impl Default for DetectorTraining {
    fn default() -> Self {
        Self {
            epochs: default_detector_epochs(),
            learning_rate: default_learning_rate(),
            negatives_per_image: default_negatives_per_image(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotTraining {
    #[serde(default = "default_few_shot_epochs")]
    pub epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    /// Epochs without validation improvement before stopping.
    #[serde(default = "default_patience")]
    pub patience: usize,
}

impl Default for FewShotTraining {
    fn default() -> Self {
        Self {
            epochs: default_few_shot_epochs(),
            learning_rate: default_learning_rate(),
            patience: default_patience(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Weight files smaller than this are treated as missing.
    #[serde(default = "default_min_artifact_bytes")]
    pub min_artifact_bytes: u64,
    #[serde(default = "default_confidence")]
    pub detector_confidence: f32,
    #[serde(default = "default_confidence")]
    pub few_shot_confidence: f32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            min_artifact_bytes: default_min_artifact_bytes(),
            detector_confidence: default_confidence(),
            few_shot_confidence: default_confidence(),
            nms_iou: default_nms_iou(),
            max_detections: default_max_detections(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_train_fraction() -> f64 {
    0.8
}

fn default_augmentations_per_image() -> usize {
    1
}

fn default_detector_epochs() -> usize {
    DetectorOptions::default().epochs
}

fn default_few_shot_epochs() -> usize {
    FewShotOptions::default().epochs
}

fn default_learning_rate() -> f32 {
    0.5
}

fn default_negatives_per_image() -> usize {
    DetectorOptions::default().negatives_per_image
}

fn default_patience() -> usize {
    5
}

fn default_min_artifact_bytes() -> u64 {
    crate::cache::DEFAULT_MIN_ARTIFACT_BYTES
}

fn default_confidence() -> f32 {
    0.5
}

fn default_nms_iou() -> f32 {
    0.45
}

fn default_max_detections() -> usize {
    20
}

fn clamp_unit(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

impl OrchestratorConfig {
    /// Clamp every numeric setting into its usable range.
    pub fn normalized(mut self) -> Self {
        let fraction = self.dataset.train_fraction;
        self.dataset.train_fraction = if fraction.is_finite() && fraction > 0.0 {
            fraction.min(1.0)
        } else {
            default_train_fraction()
        };
        let train = &mut self.training;
        train.detector.epochs = train.detector.epochs.max(1);
        train.few_shot.epochs = train.few_shot.epochs.max(1);
        train.few_shot.patience = train.few_shot.patience.max(1);
        for rate in [
            &mut train.detector.learning_rate,
            &mut train.few_shot.learning_rate,
        ] {
            if !rate.is_finite() || *rate <= 0.0 {
                *rate = default_learning_rate();
            }
        }
        let inference = &mut self.inference;
        inference.detector_confidence =
            clamp_unit(inference.detector_confidence, default_confidence());
        inference.few_shot_confidence =
            clamp_unit(inference.few_shot_confidence, default_confidence());
        inference.nms_iou = clamp_unit(inference.nms_iou, default_nms_iou());
        inference.max_detections = inference.max_detections.max(1);
        self
    }

    pub fn dataset_options(&self) -> DatasetOptions {
        DatasetOptions {
            seed: self.dataset.seed,
            train_fraction: self.dataset.train_fraction,
            augmentations_per_image: self.dataset.augmentations_per_image,
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            epochs: self.training.detector.epochs,
            learning_rate: self.training.detector.learning_rate,
            negatives_per_image: self.training.detector.negatives_per_image,
            confidence_threshold: self.inference.detector_confidence,
            nms_iou: self.inference.nms_iou,
            max_detections: self.inference.max_detections,
            seed: self.dataset.seed,
            ..DetectorOptions::default()
        }
    }

    pub fn few_shot_options(&self) -> FewShotOptions {
        FewShotOptions {
            epochs: self.training.few_shot.epochs,
            learning_rate: self.training.few_shot.learning_rate,
            patience: self.training.few_shot.patience,
            confidence_threshold: self.inference.few_shot_confidence,
            max_detections: self.inference.max_detections,
            seed: self.dataset.seed,
        }
    }

    pub fn uploads_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.paths.uploads_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(app_dirs::default_uploads_dir()?),
        }
    }

    pub fn workspace_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.paths.workspace_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(app_dirs::default_workspace_dir()?),
        }
    }
}

/// Resolve the configuration file path inside the app root.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from the app root, returning defaults if missing.
pub fn load_or_default() -> Result<OrchestratorConfig, ConfigError> {
    load_from(&config_path()?)
}

/// Load configuration from `path`; a missing file yields defaults.
pub fn load_from(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    if !path.exists() {
        return Ok(OrchestratorConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: OrchestratorConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config.normalized())
}

/// Save configuration to a specific path, replacing it atomically.
pub fn save_to_path(config: &OrchestratorConfig, path: &Path) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(config)?;
    fs_atomic::write_atomic(path, text.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
