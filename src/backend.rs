//! Fit/predict capability behind each training controller.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::dataset::{DatasetManifest, ManifestError};
use crate::ml::logreg::LogRegError;
use crate::prediction::RawDetection;

/// Default artifact file name inside a job or model directory.
pub const WEIGHTS_FILE_NAME: &str = "weights.json";

/// The two independent model types the orchestrator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Detector,
    FewShot,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Detector, ModelKind::FewShot];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Detector => "detector",
            ModelKind::FewShot => "few_shot",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detector" | "yolo" => Ok(ModelKind::Detector),
            "few_shot" | "few-shot" | "fewshot" => Ok(ModelKind::FewShot),
            other => Err(format!("Unknown model type: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum FitError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("Fit I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No usable training samples in {0}")]
    NoSamples(PathBuf),
    #[error("Training failed: {0}")]
    Train(#[from] LogRegError),
    #[error("Failed to serialize weights: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Training panicked: {0}")]
    Panicked(String),
}

/// Everything a backend needs to fit one model.
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub manifest_path: PathBuf,
    pub manifest: DatasetManifest,
    /// Per-job directory the fitted artifact is written into.
    pub output_dir: PathBuf,
    /// Canonical weights of the previous run, if any, for warm starts.
    pub previous_weights: Option<PathBuf>,
}

impl FitRequest {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(WEIGHTS_FILE_NAME)
    }
}

/// A trainable model type.
///
/// `fit` runs on the controller's worker thread; `predict` may be called
/// from any thread against a shared, loaded model.
pub trait ModelBackend: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    fn kind(&self) -> ModelKind;

    /// Fit on the prepared dataset and return the path of the written artifact.
    ///
    /// `progress` receives values in `[0, 1]`, once per epoch.
    fn fit(&self, request: &FitRequest, progress: &dyn Fn(f32)) -> Result<PathBuf, FitError>;

    fn load(&self, path: &Path) -> Result<Self::Model, CacheError>;

    fn predict(&self, model: &Self::Model, image: &RgbImage) -> Vec<RawDetection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_common_spellings() {
        assert_eq!("yolo".parse::<ModelKind>(), Ok(ModelKind::Detector));
        assert_eq!("Few-Shot".parse::<ModelKind>(), Ok(ModelKind::FewShot));
        assert!("resnet".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::FewShot.to_string(), "few_shot");
    }
}
