//! Annotation data model and the pull-only annotation store boundary.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::NormalizedRect;

/// Who produced a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoxSource {
    #[default]
    Human,
    Ai,
}

/// A labeled box in normalized top-left coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub source: BoxSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl BoundingBox {
    /// Geometry of the box clamped into the unit square.
    pub fn rect(&self) -> NormalizedRect {
        NormalizedRect::clamped(self.x, self.y, self.width, self.height)
    }

    /// Label text as used for class lookup.
    pub fn class_label(&self) -> &str {
        self.label.trim()
    }
}

/// One image together with its annotations, as held by the annotation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabeledImage {
    pub filename: String,
    #[serde(default)]
    pub annotations: Vec<BoundingBox>,
    #[serde(default)]
    pub is_fully_annotated: bool,
}

impl LabeledImage {
    /// Labeled boxes that a human confirmed; the only boxes used for training.
    pub fn verified_boxes(&self) -> impl Iterator<Item = &BoundingBox> {
        self.annotations
            .iter()
            .filter(|bbox| bbox.is_verified && !bbox.class_label().is_empty())
    }

    pub fn has_verified_boxes(&self) -> bool {
        self.verified_boxes().next().is_some()
    }
}

/// Distinct labels across the verified boxes of `images`.
pub fn verified_labels<'a>(images: impl IntoIterator<Item = &'a LabeledImage>) -> BTreeSet<String> {
    images
        .into_iter()
        .flat_map(|image| image.verified_boxes())
        .map(|bbox| bbox.class_label().to_string())
        .collect()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read annotation store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid annotation store {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Read-only source of annotation snapshots.
pub trait AnnotationStore {
    /// Images the annotator marked as complete.
    fn fully_annotated(&self) -> Result<Vec<LabeledImage>, StoreError>;
    /// Every filename the store knows about, annotated or not.
    fn all_filenames(&self) -> Result<Vec<String>, StoreError>;
}

/// Annotation store backed by a JSON array of [`LabeledImage`] records.
#[derive(Debug, Clone)]
pub struct JsonAnnotationStore {
    path: PathBuf,
}

impl JsonAnnotationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<LabeledImage>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl AnnotationStore for JsonAnnotationStore {
    fn fully_annotated(&self) -> Result<Vec<LabeledImage>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|image| image.is_fully_annotated)
            .collect())
    }

    fn all_filenames(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .map(|image| image.filename)
            .collect())
    }
}
