//! Sliding-window patch detector.
//!
//! Training crops every verified box plus random background windows, then
//! fits a softmax head whose last class is "background". Prediction slides
//! windows sized from per-class box priors over the image, keeps windows
//! whose best foreground class clears the confidence threshold, and applies
//! per-class non-maximum suppression.

use std::path::{Path, PathBuf};

use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{LabeledSample, WEIGHTS_FORMAT_VERSION, read_partition, read_weights, write_weights};
use crate::backend::{FitError, FitRequest, ModelBackend, ModelKind};
use crate::cache::CacheError;
use crate::dataset::Split;
use crate::geometry::NormalizedRect;
use crate::ml::features::{FEATURE_DIM, crop_features};
use crate::ml::logreg::{LogRegModel, TrainDataset, TrainOptions, train_logreg};
use crate::ml::argmax;
use crate::prediction::RawDetection;

/// Background windows must overlap every true box less than this.
const NEGATIVE_MAX_IOU: f32 = 0.3;
const NEGATIVE_ATTEMPTS: usize = 12;
const DEFAULT_PRIOR: f32 = 0.3;

#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub negatives_per_image: usize,
    pub confidence_threshold: f32,
    pub nms_iou: f32,
    pub max_detections: usize,
    /// Window scales applied to each class's size prior.
    pub scales: Vec<f32>,
    pub seed: u64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            epochs: 30,
            learning_rate: 0.5,
            negatives_per_image: 6,
            confidence_threshold: 0.5,
            nms_iou: 0.45,
            max_detections: 20,
            scales: vec![0.75, 1.0, 1.25],
            seed: 42,
        }
    }
}

/// Mean normalized box size of one class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizePrior {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorWeights {
    pub format_version: u32,
    pub feature_dim: usize,
    pub names: Vec<String>,
    pub priors: Vec<SizePrior>,
    /// `names.len() + 1` classes; the last one is background.
    pub head: LogRegModel,
}

impl DetectorWeights {
    pub fn foreground_classes(&self) -> usize {
        self.names.len()
    }

    fn validate(&self) -> Result<(), String> {
        if self.feature_dim != FEATURE_DIM || self.head.dim != FEATURE_DIM {
            return Err(format!(
                "feature dimension {} (expected {FEATURE_DIM})",
                self.head.dim
            ));
        }
        if self.head.classes != self.names.len() + 1 {
            return Err("head does not match class names".to_string());
        }
        if self.priors.len() != self.names.len() {
            return Err("size priors do not match class names".to_string());
        }
        self.head.validate().map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatchDetector {
    options: DetectorOptions,
}

impl PatchDetector {
    pub fn new(options: DetectorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    fn warm_start(&self, previous: Option<&Path>, classes: usize) -> Option<LogRegModel> {
        let weights: DetectorWeights = read_weights(previous?).ok()?;
        if weights.validate().is_err() || weights.head.classes != classes {
            tracing::info!("Previous detector weights do not fit, training from scratch");
            return None;
        }
        tracing::info!("Warm-starting detector from previous weights");
        Some(weights.head)
    }

    fn collect(
        &self,
        samples: &[LabeledSample],
        nc: usize,
        rng: &mut StdRng,
        priors: &mut [(f32, f32, u32)],
    ) -> TrainDataset {
        let mut dataset = TrainDataset {
            classes: nc + 1,
            ..TrainDataset::default()
        };
        for sample in samples {
            let (width, height) = sample.image.dimensions();
            let mut truths = Vec::new();
            for line in &sample.lines {
                let class_id = line.class_id as usize;
                if class_id >= nc {
                    continue;
                }
                let [cx, cy, w, h] = line.center;
                let rect = NormalizedRect::from_center(cx, cy, w, h);
                if rect.is_empty() {
                    continue;
                }
                let (px, py, pw, ph) = rect.to_pixels(width, height);
                dataset.x.push(crop_features(&sample.image, px, py, pw, ph));
                dataset.y.push(class_id);
                let prior = &mut priors[class_id];
                prior.0 += rect.width;
                prior.1 += rect.height;
                prior.2 += 1;
                truths.push(rect);
            }
            for _ in 0..self.options.negatives_per_image {
                let Some(rect) = sample_background(rng, &truths) else {
                    continue;
                };
                let (px, py, pw, ph) = rect.to_pixels(width, height);
                dataset.x.push(crop_features(&sample.image, px, py, pw, ph));
                dataset.y.push(nc);
            }
        }
        dataset
    }
}

fn sample_background(rng: &mut StdRng, truths: &[NormalizedRect]) -> Option<NormalizedRect> {
    for _ in 0..NEGATIVE_ATTEMPTS {
        let width = rng.random_range(0.1f32..0.5);
        let height = rng.random_range(0.1f32..0.5);
        let x = rng.random_range(0.0..(1.0 - width));
        let y = rng.random_range(0.0..(1.0 - height));
        let rect = NormalizedRect::clamped(x, y, width, height);
        if truths.iter().all(|truth| truth.iou(&rect) < NEGATIVE_MAX_IOU) {
            return Some(rect);
        }
    }
    None
}

/// Window start offsets covering `extent` with half-window stride.
fn window_starts(extent: u32, size: u32) -> Vec<u32> {
    if size >= extent {
        return vec![0];
    }
    let last = extent - size;
    let stride = (size / 2).max(1) as usize;
    let mut starts: Vec<u32> = (0..=last).step_by(stride).collect();
    if starts.last() != Some(&last) {
        starts.push(last);
    }
    starts
}

fn corner_iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let left = a.x1.max(b.x1);
    let top = a.y1.max(b.y1);
    let right = a.x2.min(b.x2);
    let bottom = a.y2.min(b.y2);
    if right <= left || bottom <= top {
        return 0.0;
    }
    let inter = (right - left) * (bottom - top);
    let area = |d: &RawDetection| (d.x2 - d.x1) * (d.y2 - d.y1);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy per-class non-maximum suppression, highest confidence first.
fn suppress(mut candidates: Vec<RawDetection>, iou: f32, limit: usize) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= limit {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && corner_iou(k, &candidate) > iou);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

impl ModelBackend for PatchDetector {
    type Model = DetectorWeights;

    fn kind(&self) -> ModelKind {
        ModelKind::Detector
    }

    fn fit(&self, request: &FitRequest, progress: &dyn Fn(f32)) -> Result<PathBuf, FitError> {
        let manifest = &request.manifest;
        let nc = manifest.nc;
        let train_dir = manifest.images_dir(Split::Train);
        if nc == 0 {
            return Err(FitError::NoSamples(train_dir));
        }
        let samples = read_partition(manifest, Split::Train)?;
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let mut prior_sums = vec![(0.0f32, 0.0f32, 0u32); nc];
        let dataset = self.collect(&samples, nc, &mut rng, &mut prior_sums);
        if !dataset.y.iter().any(|y| *y < nc) {
            return Err(FitError::NoSamples(train_dir));
        }
        tracing::info!(
            "Detector fit on {} patches from {} images ({nc} classes)",
            dataset.x.len(),
            samples.len()
        );

        let init = self.warm_start(request.previous_weights.as_deref(), nc + 1);
        let options = TrainOptions {
            epochs: self.options.epochs,
            learning_rate: self.options.learning_rate,
            seed: self.options.seed,
            ..TrainOptions::default()
        };
        let head = train_logreg(&dataset, &options, init.as_ref(), &|done, total| {
            progress(done as f32 / total.max(1) as f32)
        })?;

        let priors = prior_sums
            .iter()
            .map(|(w, h, n)| {
                if *n == 0 {
                    SizePrior {
                        width: DEFAULT_PRIOR,
                        height: DEFAULT_PRIOR,
                    }
                } else {
                    SizePrior {
                        width: w / *n as f32,
                        height: h / *n as f32,
                    }
                }
            })
            .collect();
        let weights = DetectorWeights {
            format_version: WEIGHTS_FORMAT_VERSION,
            feature_dim: FEATURE_DIM,
            names: manifest.names.clone(),
            priors,
            head,
        };

        let val = read_partition(manifest, Split::Val)?;
        let val_set = self.collect(&val, nc, &mut rng, &mut vec![(0.0, 0.0, 0); nc]);
        if !val_set.x.is_empty() {
            let correct = val_set
                .x
                .iter()
                .zip(&val_set.y)
                .filter(|(x, y)| weights.head.predict_class_index(x) == **y)
                .count();
            tracing::info!(
                "Detector validation patch accuracy {:.3} over {} patches",
                correct as f32 / val_set.x.len() as f32,
                val_set.x.len()
            );
        }

        let path = request.output_path();
        write_weights(&path, &weights)?;
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<DetectorWeights, CacheError> {
        let weights: DetectorWeights = read_weights(path)?;
        weights.validate().map_err(|reason| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(weights)
    }

    fn predict(&self, model: &DetectorWeights, image: &RgbImage) -> Vec<RawDetection> {
        let (width, height) = image.dimensions();
        let nc = model.foreground_classes();
        if width == 0 || height == 0 || nc == 0 {
            return Vec::new();
        }
        let mut sizes: Vec<(u32, u32)> = model
            .priors
            .iter()
            .flat_map(|prior| {
                self.options.scales.iter().map(move |scale| {
                    let w = (prior.width * scale).clamp(0.05, 1.0);
                    let h = (prior.height * scale).clamp(0.05, 1.0);
                    (
                        ((w * width as f32).round() as u32).clamp(1, width),
                        ((h * height as f32).round() as u32).clamp(1, height),
                    )
                })
            })
            .collect();
        sizes.sort_unstable();
        sizes.dedup();

        let mut candidates = Vec::new();
        for (pw, ph) in sizes {
            for y in window_starts(height, ph) {
                for x in window_starts(width, pw) {
                    let proba = model
                        .head
                        .predict_proba(&crop_features(image, x, y, pw, ph));
                    if proba.len() != nc + 1 {
                        continue;
                    }
                    let class_id = argmax(&proba[..nc]);
                    let confidence = proba[class_id];
                    if confidence >= self.options.confidence_threshold {
                        candidates.push(RawDetection {
                            x1: x as f32,
                            y1: y as f32,
                            x2: (x + pw) as f32,
                            y2: (y + ph) as f32,
                            class_id: class_id as u32,
                            confidence,
                        });
                    }
                }
            }
        }
        suppress(candidates, self.options.nms_iou, self.options.max_detections)
    }
}
