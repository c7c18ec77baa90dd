//! Image augmentation boundary used while preparing training partitions.
//!
//! The dataset builder hands the augmenter an image, its boxes in center
//! format and their numeric class IDs. The augmenter owns every pixel-level
//! transform and writes `<stem>_aug<i>` image/label pairs next to the
//! originals.

use std::path::{Path, PathBuf};

use image::{RgbImage, imageops};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::dataset::labels::{LabelLine, write_label_file};

/// Marker inserted between the file stem and the variant index.
pub const AUGMENT_SUFFIX: &str = "_aug";

#[derive(Debug, Error)]
pub enum AugmentError {
    #[error("Image not found: {0}")]
    MissingImage(PathBuf),
    #[error("Boxes and class IDs differ in length ({boxes} vs {class_ids})")]
    LengthMismatch { boxes: usize, class_ids: usize },
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Failed to write {path}: {source}")]
    WriteImage {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Failed to write labels {path}: {source}")]
    WriteLabels {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Inputs for augmenting one training image.
#[derive(Debug, Clone, Copy)]
pub struct AugmentRequest<'a> {
    pub image_path: &'a Path,
    /// Clamped `[cx, cy, w, h]` boxes.
    pub boxes: &'a [[f32; 4]],
    pub class_ids: &'a [u32],
    /// Path of the copied original; variants are derived from it.
    pub output_image_path: &'a Path,
    pub output_label_path: &'a Path,
    pub count: usize,
}

impl AugmentRequest<'_> {
    /// Image and label paths of the `index`-th variant.
    pub fn variant_paths(&self, index: usize) -> (PathBuf, PathBuf) {
        (
            variant_path(self.output_image_path, index),
            variant_path(self.output_label_path, index),
        )
    }
}

/// Pixel-level augmentation collaborator.
pub trait Augmenter: Send + Sync {
    /// Write up to `request.count` variants and return how many were written.
    fn augment(&self, request: &AugmentRequest<'_>) -> Result<usize, AugmentError>;
}

/// `<stem>_aug<index>.<ext>` next to `base`.
pub fn variant_path(base: &Path, index: usize) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}{AUGMENT_SUFFIX}{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}{AUGMENT_SUFFIX}{index}"),
    };
    base.with_file_name(name)
}

/// True when `path` names an augmented variant: its stem ends in `_aug<digits>`.
pub fn is_variant(path: &Path) -> bool {
    original_stem(path).is_some()
}

/// Stem of the original a variant was derived from.
pub fn original_stem(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let idx = stem.rfind(AUGMENT_SUFFIX)?;
    let index = &stem[idx + AUGMENT_SUFFIX.len()..];
    if index.is_empty() || !index.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    Some(stem[..idx].to_string())
}

#[derive(Debug, Clone)]
pub struct AugmentOptions {
    pub flip_horizontal_prob: f32,
    pub flip_vertical_prob: f32,
    pub rotate90_prob: f32,
    /// Maximum absolute brightness shift applied to every channel.
    pub brightness_jitter: i32,
    /// Maximum absolute contrast change in percent.
    pub contrast_jitter: f32,
    pub seed: u64,
}

impl Default for AugmentOptions {
    fn default() -> Self {
        Self {
            flip_horizontal_prob: 0.5,
            flip_vertical_prob: 0.5,
            rotate90_prob: 0.5,
            brightness_jitter: 30,
            contrast_jitter: 20.0,
            seed: 42,
        }
    }
}

/// Seeded flip/rotate/brightness/contrast augmenter built on `image`.
#[derive(Debug, Clone, Default)]
pub struct ImageAugmenter {
    options: AugmentOptions,
}

impl ImageAugmenter {
    pub fn new(options: AugmentOptions) -> Self {
        Self { options }
    }

    fn rng_for(&self, image_path: &Path, index: usize) -> StdRng {
        let key = format!(
            "{}|{}|{index}",
            self.options.seed,
            image_path.file_name().unwrap_or_default().to_string_lossy()
        );
        let hash = blake3::hash(key.as_bytes());
        StdRng::from_seed(*hash.as_bytes())
    }

    fn augment_once(
        &self,
        image: &RgbImage,
        boxes: &[[f32; 4]],
        rng: &mut StdRng,
    ) -> (RgbImage, Vec<[f32; 4]>) {
        let mut out = image.clone();
        let mut boxes = boxes.to_vec();
        if rng.random::<f32>() < self.options.flip_horizontal_prob {
            imageops::flip_horizontal_in_place(&mut out);
            for bbox in &mut boxes {
                bbox[0] = 1.0 - bbox[0];
            }
        }
        if rng.random::<f32>() < self.options.flip_vertical_prob {
            imageops::flip_vertical_in_place(&mut out);
            for bbox in &mut boxes {
                bbox[1] = 1.0 - bbox[1];
            }
        }
        if rng.random::<f32>() < self.options.rotate90_prob {
            out = imageops::rotate90(&out);
            for bbox in &mut boxes {
                let [cx, cy, w, h] = *bbox;
                *bbox = [1.0 - cy, cx, h, w];
            }
        }
        let jitter = self.options.brightness_jitter.max(0);
        if jitter > 0 {
            let shift = rng.random_range(-jitter..=jitter);
            out = imageops::brighten(&out, shift);
        }
        let contrast = self.options.contrast_jitter.abs();
        if contrast > 0.0 {
            let change = rng.random_range(-contrast..=contrast);
            out = imageops::contrast(&out, change);
        }
        (out, boxes)
    }
}

impl Augmenter for ImageAugmenter {
    fn augment(&self, request: &AugmentRequest<'_>) -> Result<usize, AugmentError> {
        if request.boxes.len() != request.class_ids.len() {
            return Err(AugmentError::LengthMismatch {
                boxes: request.boxes.len(),
                class_ids: request.class_ids.len(),
            });
        }
        if !request.image_path.is_file() {
            return Err(AugmentError::MissingImage(request.image_path.to_path_buf()));
        }
        let image = image::open(request.image_path)
            .map_err(|source| AugmentError::Decode {
                path: request.image_path.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let mut written = 0usize;
        for index in 0..request.count {
            let mut rng = self.rng_for(request.image_path, index);
            let (variant, boxes) = self.augment_once(&image, request.boxes, &mut rng);
            let (image_path, label_path) = request.variant_paths(index);
            if let Err(source) = variant.save(&image_path) {
                tracing::warn!("Skipping augmentation {}: {source}", image_path.display());
                continue;
            }
            let lines: Vec<LabelLine> = boxes
                .iter()
                .zip(request.class_ids)
                .map(|(bbox, class_id)| LabelLine::clamped(*class_id, *bbox))
                .collect();
            write_label_file(&label_path, &lines).map_err(|source| {
                AugmentError::WriteLabels {
                    path: label_path.clone(),
                    source,
                }
            })?;
            written += 1;
        }
        Ok(written)
    }
}
