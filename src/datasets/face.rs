use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A face bounding box in pixel coordinates, `right` and `bottom` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl FaceRegion {
    pub fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i64 {
        self.right - self.left
    }

    pub fn height(&self) -> i64 {
        self.bottom - self.top
    }

    /// Clips the region to a `width` x `height` image and returns it as `(x, y, w, h)`,
    /// or None if nothing of it lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let left = self.left.clamp(0, width as i64);
        let right = self.right.clamp(0, width as i64);
        let top = self.top.clamp(0, height as i64);
        let bottom = self.bottom.clamp(0, height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some((left as u32, top as u32, (right - left) as u32, (bottom - top) as u32))
    }
}

/// Pluggable face detection backend. Returns every region found, best first.
pub trait FaceDetector {
    fn detect(&self, image: &RgbImage) -> Vec<FaceRegion>;
}

impl<F> FaceDetector for F
where
    F: Fn(&RgbImage) -> Vec<FaceRegion>,
{
    fn detect(&self, image: &RgbImage) -> Vec<FaceRegion> {
        self(image)
    }
}

/// Never finds a face, so every image is used whole.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect(&self, _image: &RgbImage) -> Vec<FaceRegion> {
        Vec::new()
    }
}

/// Reports the same region for every image, for pre-aligned datasets where faces sit at a
/// known location.
#[derive(Clone, Copy, Debug)]
pub struct FixedRegionDetector {
    pub region: FaceRegion,
}

impl FixedRegionDetector {
    pub fn new(region: FaceRegion) -> Self {
        Self { region }
    }
}

impl FaceDetector for FixedRegionDetector {
    fn detect(&self, image: &RgbImage) -> Vec<FaceRegion> {
        match self.region.clamp_to(image.width(), image.height()) {
            Some(_) => vec![self.region],
            None => Vec::new(),
        }
    }
}
