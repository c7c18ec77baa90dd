//! Fixed-length colour features for image crops.
//!
//! A crop is resized to a small thumbnail and concatenated with per-channel
//! intensity histograms. Every feature lies in `[0, 1]`.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Side length of the resized thumbnail.
pub const THUMB_SIZE: u32 = 8;
/// Histogram bins per colour channel.
pub const HIST_BINS: usize = 4;
/// Length of every feature vector produced here.
pub const FEATURE_DIM: usize = (THUMB_SIZE * THUMB_SIZE * 3) as usize + HIST_BINS * 3;

/// Features of the pixel window `(x, y, width, height)`; the window is clipped to the image.
pub fn crop_features(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> Vec<f32> {
    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 {
        return vec![0.0; FEATURE_DIM];
    }
    let x = x.min(img_w - 1);
    let y = y.min(img_h - 1);
    let width = width.clamp(1, img_w - x);
    let height = height.clamp(1, img_h - y);
    let crop = imageops::crop_imm(image, x, y, width, height).to_image();
    features_of(&crop)
}

/// Features of the whole image.
pub fn image_features(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    crop_features(image, 0, 0, width, height)
}

fn features_of(crop: &RgbImage) -> Vec<f32> {
    let thumb = imageops::resize(crop, THUMB_SIZE, THUMB_SIZE, FilterType::Triangle);
    let mut out = Vec::with_capacity(FEATURE_DIM);
    for pixel in thumb.pixels() {
        for channel in pixel.0 {
            out.push(channel as f32 / 255.0);
        }
    }
    let mut hist = [0u32; HIST_BINS * 3];
    for pixel in crop.pixels() {
        for (c, channel) in pixel.0.iter().enumerate() {
            let bin = (*channel as usize * HIST_BINS / 256).min(HIST_BINS - 1);
            hist[c * HIST_BINS + bin] += 1;
        }
    }
    let total = (crop.width() * crop.height()).max(1) as f32;
    out.extend(hist.iter().map(|count| *count as f32 / total));
    out
}
