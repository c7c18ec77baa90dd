use std::path::Path;

use annolab::annotations::{BoundingBox, BoxSource, LabeledImage};
use image::{Rgb, RgbImage};

pub const IMAGE_SIZE: u32 = 64;

/// Gray canvas with one solid square at `(x, y)` of `size` pixels.
pub fn square_image(color: [u8; 3], x: u32, y: u32, size: u32) -> RgbImage {
    let mut image = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, Rgb([128, 128, 128]));
    for py in y..(y + size).min(IMAGE_SIZE) {
        for px in x..(x + size).min(IMAGE_SIZE) {
            image.put_pixel(px, py, Rgb(color));
        }
    }
    image
}

fn verified_box(label: &str, x: u32, y: u32, size: u32) -> BoundingBox {
    let scale = IMAGE_SIZE as f32;
    BoundingBox {
        x: x as f32 / scale,
        y: y as f32 / scale,
        width: size as f32 / scale,
        height: size as f32 / scale,
        label: label.to_string(),
        is_verified: true,
        source: BoxSource::Human,
        confidence: None,
    }
}

/// Write `count` PNGs alternating red and blue squares and return their annotations.
pub fn write_fixture_set(uploads: &Path, count: usize) -> Vec<LabeledImage> {
    std::fs::create_dir_all(uploads).unwrap();
    (0..count)
        .map(|idx| {
            let (label, color) = if idx % 2 == 0 {
                ("red", [220, 20, 20])
            } else {
                ("blue", [20, 20, 220])
            };
            let offset = 4 + (idx as u32 * 5) % 24;
            let size = 24;
            let filename = format!("img_{idx:02}.png");
            square_image(color, offset, offset, size)
                .save(uploads.join(&filename))
                .unwrap();
            LabeledImage {
                filename,
                annotations: vec![verified_box(label, offset, offset, size)],
                is_fully_annotated: true,
            }
        })
        .collect()
}
