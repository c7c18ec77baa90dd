//! Model output records handed back to the annotation tool.

use serde::{Deserialize, Serialize};

use crate::annotations::BoxSource;
use crate::geometry::{NormalizedRect, finite_or_zero};
use crate::registry::ClassMap;

/// A detection in absolute pixel corners as produced by a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: u32,
    pub confidence: f32,
}

/// A reviewable suggestion; every numeric field is a finite `f32`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: String,
    pub confidence: f32,
    pub source: BoxSource,
    pub is_verified: bool,
}

impl Prediction {
    /// Normalize a raw detection against the image size and resolve its label.
    pub fn new(raw: &RawDetection, class_map: &ClassMap, image_width: u32, image_height: u32) -> Self {
        let rect = NormalizedRect::from_pixel_corners(
            raw.x1,
            raw.y1,
            raw.x2,
            raw.y2,
            image_width,
            image_height,
        );
        let label = class_map
            .label_for(raw.class_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("unknown_{}", raw.class_id));
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            label,
            confidence: finite_or_zero(raw.confidence).clamp(0.0, 1.0),
            source: BoxSource::Ai,
            is_verified: false,
        }
    }

    pub fn rect(&self) -> NormalizedRect {
        NormalizedRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}
