//! Turns fully annotated images into an on-disk train/val dataset in detector format.

pub mod labels;
pub mod manifest;
pub mod split;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::annotations::{LabeledImage, verified_labels};
use crate::augment::{AugmentRequest, Augmenter};
use crate::fs_atomic;
use crate::registry::{ClassMap, ClassRegistry, RegistryError};

use labels::{LabelLine, write_label_file};
pub use manifest::{DatasetManifest, MANIFEST_FILE_NAME, ManifestError, Split};
use split::{DEFAULT_SPLIT_SEED, split_indices};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("No images landed in the training partition")]
    NoTrainingImages,
    #[error("Dataset I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub seed: u64,
    pub train_fraction: f64,
    /// Variants requested from the augmenter per training image.
    pub augmentations_per_image: usize,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SPLIT_SEED,
            train_fraction: 0.8,
            augmentations_per_image: 1,
        }
    }
}

/// Outcome of a successful [`DatasetBuilder::prepare`].
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub train_count: usize,
    pub val_count: usize,
    pub augmented_count: usize,
    /// Filenames left out, either unverified or missing on disk.
    pub skipped: Vec<String>,
    pub manifest_path: PathBuf,
    pub manifest: DatasetManifest,
    pub class_map: ClassMap,
}

pub struct DatasetBuilder {
    uploads_dir: PathBuf,
    out_dir: PathBuf,
    registry: ClassRegistry,
    augmenter: Arc<dyn Augmenter>,
    options: DatasetOptions,
}

struct Eligible<'a> {
    image: &'a LabeledImage,
    file_name: String,
}

impl DatasetBuilder {
    pub fn new(
        uploads_dir: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
        registry: ClassRegistry,
        augmenter: Arc<dyn Augmenter>,
        options: DatasetOptions,
    ) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            out_dir: out_dir.into(),
            registry,
            augmenter,
            options,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Build the dataset for `images`, replacing anything previously under the output dir.
    pub fn prepare(&self, images: &[LabeledImage]) -> Result<PreparedDataset, DatasetError> {
        let mut skipped = Vec::new();
        let mut eligible = Vec::new();
        for image in images {
            let file_name = Path::new(&image.filename)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            match file_name {
                Some(file_name) if image.has_verified_boxes() => {
                    if self.uploads_dir.join(&file_name).is_file() {
                        eligible.push(Eligible { image, file_name });
                    } else {
                        tracing::warn!("Skipping {}: image not found", image.filename);
                        skipped.push(image.filename.clone());
                    }
                }
                _ => {
                    tracing::info!("Skipping {}: no verified boxes", image.filename);
                    skipped.push(image.filename.clone());
                }
            }
        }
        eligible.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        eligible.dedup_by(|a, b| a.file_name == b.file_name);
        if eligible.is_empty() {
            return Err(DatasetError::NoTrainingImages);
        }
        let class_map = self
            .registry
            .update(&verified_labels(eligible.iter().map(|entry| entry.image)))?;

        fs_atomic::remove_dir_if_exists(&self.out_dir).map_err(|source| DatasetError::Io {
            path: self.out_dir.clone(),
            source,
        })?;
        let manifest = DatasetManifest::new(&self.out_dir, class_map.names_by_id());
        for split in [Split::Train, Split::Val] {
            for dir in [manifest.images_dir(split), manifest.labels_dir(split)] {
                std::fs::create_dir_all(&dir)
                    .map_err(|source| DatasetError::Io { path: dir, source })?;
            }
        }

        let partition = split_indices(
            eligible.len(),
            self.options.train_fraction,
            self.options.seed,
        );
        let mut train_count = 0;
        let mut augmented_count = 0;
        for &idx in &partition.train {
            let entry = &eligible[idx];
            let Some(written) = self.write_entry(entry, &manifest, Split::Train, &class_map)?
            else {
                skipped.push(entry.image.filename.clone());
                continue;
            };
            train_count += 1;
            augmented_count += self.augment_entry(&written);
        }
        let mut val_count = 0;
        for &idx in &partition.val {
            let entry = &eligible[idx];
            match self.write_entry(entry, &manifest, Split::Val, &class_map)? {
                Some(_) => val_count += 1,
                None => skipped.push(entry.image.filename.clone()),
            }
        }
        if train_count == 0 {
            return Err(DatasetError::NoTrainingImages);
        }

        let manifest_path = self.out_dir.join(MANIFEST_FILE_NAME);
        manifest.save(&manifest_path)?;
        tracing::info!(
            "Prepared dataset {}: {train_count} train, {val_count} val, {augmented_count} augmented, {} skipped",
            self.out_dir.display(),
            skipped.len()
        );
        Ok(PreparedDataset {
            train_count,
            val_count,
            augmented_count,
            skipped,
            manifest_path,
            manifest,
            class_map,
        })
    }

    /// Copy one image and write its label file; `None` when the source vanished meanwhile.
    fn write_entry(
        &self,
        entry: &Eligible<'_>,
        manifest: &DatasetManifest,
        split: Split,
        class_map: &ClassMap,
    ) -> Result<Option<WrittenImage>, DatasetError> {
        let source = self.uploads_dir.join(&entry.file_name);
        if !source.is_file() {
            tracing::warn!("Skipping {}: image not found", source.display());
            return Ok(None);
        }
        let image_path = manifest.images_dir(split).join(&entry.file_name);
        let label_path = manifest.label_path_for(split, &image_path);
        std::fs::copy(&source, &image_path).map_err(|source| DatasetError::Io {
            path: image_path.clone(),
            source,
        })?;
        let lines: Vec<LabelLine> = entry
            .image
            .verified_boxes()
            .filter_map(|bbox| {
                let class_id = class_map.get(bbox.class_label())?;
                Some(LabelLine::clamped(class_id, bbox.rect().to_center()))
            })
            .collect();
        write_label_file(&label_path, &lines).map_err(|source| DatasetError::Io {
            path: label_path.clone(),
            source,
        })?;
        Ok(Some(WrittenImage {
            source,
            image_path,
            label_path,
            lines,
        }))
    }

    fn augment_entry(&self, written: &WrittenImage) -> usize {
        let count = self.options.augmentations_per_image;
        if count == 0 {
            return 0;
        }
        let boxes: Vec<[f32; 4]> = written.lines.iter().map(|line| line.center).collect();
        let class_ids: Vec<u32> = written.lines.iter().map(|line| line.class_id).collect();
        let request = AugmentRequest {
            image_path: &written.source,
            boxes: &boxes,
            class_ids: &class_ids,
            output_image_path: &written.image_path,
            output_label_path: &written.label_path,
            count,
        };
        match self.augmenter.augment(&request) {
            Ok(variants) => variants,
            Err(err) => {
                tracing::warn!(
                    "Augmentation failed for {}: {err}",
                    written.source.display()
                );
                0
            }
        }
    }
}

struct WrittenImage {
    source: PathBuf,
    image_path: PathBuf,
    label_path: PathBuf,
    lines: Vec<LabelLine>,
}
