//! Bundled pure-Rust model backends.

mod detector;
mod few_shot;

use std::path::Path;

use image::RgbImage;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::FitError;
use crate::cache::CacheError;
use crate::dataset::labels::{LabelLine, read_valid_lines};
use crate::dataset::{DatasetManifest, Split};
use crate::fs_atomic;

pub use detector::{DetectorOptions, DetectorWeights, PatchDetector, SizePrior};
pub use few_shot::{FewShotClassifier, FewShotOptions, FewShotWeights};

/// Current on-disk weights format.
pub const WEIGHTS_FORMAT_VERSION: u32 = 1;

fn read_weights<T: DeserializeOwned>(path: &Path) -> Result<T, CacheError> {
    let bytes = std::fs::read(path).map_err(|err| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|err| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn write_weights<T: Serialize>(path: &Path, weights: &T) -> Result<(), FitError> {
    let bytes = serde_json::to_vec(weights)?;
    fs_atomic::write_atomic(path, &bytes).map_err(|source| FitError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// One decoded dataset image with its valid label lines.
struct LabeledSample {
    image: RgbImage,
    lines: Vec<LabelLine>,
}

/// Decode every image of a partition that has a readable label file.
fn read_partition(
    manifest: &DatasetManifest,
    split: Split,
) -> Result<Vec<LabeledSample>, FitError> {
    let images_dir = manifest.images_dir(split);
    let paths = manifest
        .list_images(split)
        .map_err(|source| FitError::Io {
            path: images_dir,
            source,
        })?;
    let mut samples = Vec::with_capacity(paths.len());
    for path in paths {
        let label_path = manifest.label_path_for(split, &path);
        let lines = match read_valid_lines(&label_path) {
            Ok(lines) => lines,
            Err(err) => {
                tracing::warn!("Skipping {}: labels unreadable ({err})", path.display());
                continue;
            }
        };
        match image::open(&path) {
            Ok(image) => samples.push(LabeledSample {
                image: image.to_rgb8(),
                lines,
            }),
            Err(err) => tracing::warn!("Skipping {}: {err}", path.display()),
        }
    }
    Ok(samples)
}
