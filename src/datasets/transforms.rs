use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::prelude::*;

use super::ImageShape;

/// Crops `image` to `region` (x, y, w, h) when given, then resizes to the target shape.
/// `shape` must have passed `ImageShape::validate`, so its sides fit in u32.
pub fn crop_resize(image: &RgbImage, region: Option<(u32, u32, u32, u32)>, shape: &ImageShape) -> RgbImage {
    let w = u32::try_from(shape.width).unwrap_or(u32::MAX);
    let h = u32::try_from(shape.height).unwrap_or(u32::MAX);
    match region {
        Some((x, y, rw, rh)) => {
            let face = imageops::crop_imm(image, x, y, rw, rh).to_image();
            imageops::resize(&face, w, h, FilterType::Triangle)
        }
        None => imageops::resize(image, w, h, FilterType::Triangle),
    }
}

/// Copies raw pixel values (0..=255) into an [H, W, C] slot.
/// A one channel shape takes the luma of the image.
pub fn write_pixels(image: RgbImage, mut slot: ArrayViewMut3<f32>) {
    let (_, _, c) = slot.dim();
    if c == 1 {
        let gray = DynamicImage::ImageRgb8(image).to_luma8();
        for (x, y, p) in gray.enumerate_pixels() {
            slot[[y as usize, x as usize, 0]] = f32::from(p.0[0]);
        }
    } else {
        for (x, y, p) in image.enumerate_pixels() {
            for k in 0..3 {
                slot[[y as usize, x as usize, k]] = f32::from(p.0[k]);
            }
        }
    }
}

/// Maps pixel values from [0, 255] into [0, 1]
pub fn scale_to_unit(images: &Array4<f32>) -> Array4<f32> {
    images.mapv(|x| x / 255.0)
}

/// {-1, +1} -> {0, 1}
pub fn signed_to_binary(x: f32) -> f32 {
    x / 2.0 + 0.5
}
