//! Normalized box geometry shared by training labels and predictions.

use serde::{Deserialize, Serialize};

/// Upper bound applied to predicted boxes so `x + width` never reaches the image edge.
pub const PREDICTION_EDGE: f32 = 0.999;

/// Axis-aligned box in normalized top-left form, always inside the unit square.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    /// Clamp arbitrary input so that `x + width <= 1` and `y + height <= 1`.
    pub fn clamped(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::clamped_to(x, y, width, height, 1.0)
    }

    /// Clamp arbitrary input against an `edge` in `(0, 1]`.
    pub fn clamped_to(x: f32, y: f32, width: f32, height: f32, edge: f32) -> Self {
        let x = finite_or_zero(x).clamp(0.0, edge);
        let y = finite_or_zero(y).clamp(0.0, edge);
        let width = finite_or_zero(width).clamp(0.0, edge - x);
        let height = finite_or_zero(height).clamp(0.0, edge - y);
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from center-format values (`cx, cy, w, h`).
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::clamped(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    /// Convert absolute pixel corners into a prediction-safe normalized rect.
    pub fn from_pixel_corners(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        let w = image_width.max(1) as f32;
        let h = image_height.max(1) as f32;
        let (left, right) = ordered(x1, x2);
        let (top, bottom) = ordered(y1, y2);
        Self::clamped_to(
            left / w,
            top / h,
            (right - left) / w,
            (bottom - top) / h,
            PREDICTION_EDGE,
        )
    }

    /// Center-format tuple `[cx, cy, w, h]` as consumed by detector label files.
    pub fn to_center(&self) -> [f32; 4] {
        [
            self.x + self.width / 2.0,
            self.y + self.height / 2.0,
            self.width,
            self.height,
        ]
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Intersection over union with another rect.
    pub fn iou(&self, other: &NormalizedRect) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        if right <= left || bottom <= top {
            return 0.0;
        }
        let inter = (right - left) * (bottom - top);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Pixel window `(x, y, width, height)` covering this rect on an image.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> (u32, u32, u32, u32) {
        let px = (self.x * image_width as f32).floor() as u32;
        let py = (self.y * image_height as f32).floor() as u32;
        let px = px.min(image_width.saturating_sub(1));
        let py = py.min(image_height.saturating_sub(1));
        let pw = ((self.width * image_width as f32).round() as u32)
            .clamp(1, image_width.saturating_sub(px).max(1));
        let ph = ((self.height * image_height as f32).round() as u32)
            .clamp(1, image_height.saturating_sub(py).max(1));
        (px, py, pw, ph)
    }
}

/// Replace NaN and infinities with zero.
pub fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() { value } else { 0.0 }
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    let a = finite_or_zero(a);
    let b = finite_or_zero(b);
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_keeps_boxes_inside_unit_square() {
        let rect = NormalizedRect::clamped(0.8, -0.2, 0.5, 1.4);
        assert_eq!(rect.x, 0.8);
        assert_eq!(rect.y, 0.0);
        assert!((rect.x + rect.width - 1.0).abs() < 1e-6);
        assert!(rect.y + rect.height <= 1.0);
    }

    #[test]
    fn non_finite_values_collapse_to_zero() {
        let rect = NormalizedRect::clamped(f32::NAN, 0.1, f32::INFINITY, 0.2);
        assert_eq!(rect.x, 0.0);
        assert_eq!(rect.width, 0.0);
        assert!(rect.is_empty());
    }

    #[test]
    fn pixel_corners_stay_below_prediction_edge() {
        let rect = NormalizedRect::from_pixel_corners(-5.0, 10.0, 120.0, 90.0, 100, 80);
        assert_eq!(rect.x, 0.0);
        assert!(rect.x + rect.width <= PREDICTION_EDGE);
        assert!(rect.y + rect.height <= PREDICTION_EDGE);
        assert!((rect.y - 0.125).abs() < 1e-6);
    }

    #[test]
    fn swapped_corners_are_reordered() {
        let rect = NormalizedRect::from_pixel_corners(50.0, 40.0, 10.0, 20.0, 100, 100);
        assert!((rect.x - 0.1).abs() < 1e-6);
        assert!((rect.width - 0.4).abs() < 1e-6);
    }

    #[test]
    fn center_format_matches_top_left() {
        let rect = NormalizedRect::clamped(0.2, 0.4, 0.2, 0.4);
        let [cx, cy, w, h] = rect.to_center();
        assert!((cx - 0.3).abs() < 1e-6);
        assert!((cy - 0.6).abs() < 1e-6);
        let back = NormalizedRect::from_center(cx, cy, w, h);
        assert!((back.x - rect.x).abs() < 1e-6);
    }

    #[test]
    fn iou_of_identical_and_disjoint_rects() {
        let a = NormalizedRect::clamped(0.1, 0.1, 0.2, 0.2);
        let b = NormalizedRect::clamped(0.6, 0.6, 0.2, 0.2);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn pixel_window_is_never_empty() {
        let rect = NormalizedRect::clamped(0.99, 0.99, 0.0, 0.0);
        let (x, y, w, h) = rect.to_pixels(50, 50);
        assert!(x < 50 && y < 50);
        assert!(w >= 1 && h >= 1);
        assert!(x + w <= 50 && y + h <= 50);
    }
}
