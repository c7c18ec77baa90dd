//! Whole-image multi-label classifier for small datasets.
//!
//! Every image yields one feature vector and a 0/1 target per class present
//! in its label file. A sigmoid head is initialised from class prototypes and
//! refined with early stopping. Predictions cover the whole image.

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::{WEIGHTS_FORMAT_VERSION, read_partition, read_weights, write_weights};
use crate::backend::{FitError, FitRequest, ModelBackend, ModelKind};
use crate::cache::CacheError;
use crate::dataset::Split;
use crate::ml::features::{FEATURE_DIM, image_features};
use crate::ml::multilabel::{
    MultiLabelDataset, MultiLabelModel, MultiLabelOptions, train_multilabel,
};
use crate::prediction::RawDetection;

#[derive(Debug, Clone)]
pub struct FewShotOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub patience: usize,
    pub confidence_threshold: f32,
    pub max_detections: usize,
    pub seed: u64,
}

impl Default for FewShotOptions {
    fn default() -> Self {
        Self {
            epochs: 20,
            learning_rate: 0.5,
            patience: 5,
            confidence_threshold: 0.5,
            max_detections: 20,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotWeights {
    pub format_version: u32,
    pub names: Vec<String>,
    pub head: MultiLabelModel,
    pub best_loss: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FewShotClassifier {
    options: FewShotOptions,
}

impl FewShotClassifier {
    pub fn new(options: FewShotOptions) -> Self {
        Self { options }
    }
}

impl ModelBackend for FewShotClassifier {
    type Model = FewShotWeights;

    fn kind(&self) -> ModelKind {
        ModelKind::FewShot
    }

    fn fit(&self, request: &FitRequest, progress: &dyn Fn(f32)) -> Result<PathBuf, FitError> {
        let manifest = &request.manifest;
        let nc = manifest.nc;
        let train_dir = manifest.images_dir(Split::Train);
        let mut dataset = MultiLabelDataset {
            classes: nc,
            ..MultiLabelDataset::default()
        };
        for sample in read_partition(manifest, Split::Train)? {
            let mut target = vec![0.0f32; nc];
            for line in &sample.lines {
                if let Some(slot) = target.get_mut(line.class_id as usize) {
                    *slot = 1.0;
                }
            }
            if target.iter().all(|t| *t == 0.0) {
                continue;
            }
            dataset.x.push(image_features(&sample.image));
            dataset.targets.push(target);
        }
        if nc == 0 || dataset.x.is_empty() {
            return Err(FitError::NoSamples(train_dir));
        }
        tracing::info!(
            "Few-shot fit on {} images ({nc} classes)",
            dataset.x.len()
        );

        let options = MultiLabelOptions {
            max_epochs: self.options.epochs,
            learning_rate: self.options.learning_rate,
            patience: self.options.patience,
            seed: self.options.seed,
            ..MultiLabelOptions::default()
        };
        let fit = train_multilabel(&dataset, &options, &|done, total| {
            progress(done as f32 / total.max(1) as f32)
        })?;
        if fit.stopped_early {
            tracing::info!(
                "Few-shot early stop after {} epochs, best loss {:.4}",
                fit.epochs_run,
                fit.best_loss
            );
        }
        progress(1.0);

        let weights = FewShotWeights {
            format_version: WEIGHTS_FORMAT_VERSION,
            names: manifest.names.clone(),
            head: fit.model,
            best_loss: fit.best_loss,
        };
        let path = request.output_path();
        write_weights(&path, &weights)?;
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<FewShotWeights, CacheError> {
        let weights: FewShotWeights = read_weights(path)?;
        let corrupt = |reason: String| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };
        weights.head.validate().map_err(|err| corrupt(err.to_string()))?;
        if weights.head.dim != FEATURE_DIM || weights.head.classes != weights.names.len() {
            return Err(corrupt("head shape does not match classes".to_string()));
        }
        Ok(weights)
    }

    fn predict(&self, model: &FewShotWeights, image: &RgbImage) -> Vec<RawDetection> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let mut detections: Vec<RawDetection> = model
            .head
            .predict_proba(&image_features(image))
            .into_iter()
            .enumerate()
            .filter(|(_, confidence)| *confidence > self.options.confidence_threshold)
            .map(|(class_id, confidence)| RawDetection {
                x1: 0.0,
                y1: 0.0,
                x2: width as f32,
                y2: height as f32,
                class_id: class_id as u32,
                confidence,
            })
            .collect();
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections.truncate(self.options.max_detections);
        detections
    }
}
