//! Local texture variance.
//!
//! Semi-transparent overlays rarely change absolute brightness enough for a
//! plain threshold, but they do raise local contrast. The detector reports
//! the local standard deviation, rescaled so the strongest texture is 255.

use image::GrayImage;

use super::{gray_values, Detector, TEXTURE};
use crate::filter::box_mean;
use crate::raster::ConfidenceMap;

/// Below this standard deviation (in gray levels) the image is featureless.
const MIN_STDDEV: f32 = 0.5;

/// Local standard-deviation detector.
#[derive(Debug, Clone)]
pub struct TextureDetector {
    /// Side of the square statistics window.
    pub window: usize,
    /// Normalized deviation strictly above this counts as texture.
    pub sensitivity: u8,
}

impl Default for TextureDetector {
    fn default() -> Self {
        Self {
            window: 11,
            sensitivity: 40,
        }
    }
}

impl Detector for TextureDetector {
    fn name(&self) -> &'static str {
        TEXTURE
    }

    fn confidence(&self, gray: &GrayImage) -> ConfidenceMap {
        let (w, h) = gray.dimensions();
        let (wu, hu) = (w as usize, h as usize);
        let values = gray_values(gray);
        let squares: Vec<f32> = values.iter().map(|v| v * v).collect();

        let mean = box_mean(&values, wu, hu, self.window, self.window);
        let mean_sq = box_mean(&squares, wu, hu, self.window, self.window);

        let stddev: Vec<f32> = mean
            .iter()
            .zip(&mean_sq)
            .map(|(m, sq)| (sq - m * m).max(0.0).sqrt())
            .collect();

        if stddev.iter().all(|&s| s < MIN_STDDEV) {
            return ConfidenceMap::empty(w, h);
        }
        ConfidenceMap::from_normalized(&stddev, w, h)
    }

    fn decision_level(&self) -> u8 {
        self.sensitivity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn flat_image_has_no_texture() {
        let gray = GrayImage::from_pixel(40, 40, Luma([200]));
        assert!(TextureDetector::default().detect(&gray).is_empty());
    }

    #[test]
    fn checkerboard_patch_is_detected_and_flat_area_is_not() {
        let gray = GrayImage::from_fn(80, 80, |x, y| {
            if (20..40).contains(&x) && (20..40).contains(&y) && (x + y) % 2 == 0 {
                Luma([255])
            } else {
                Luma([100])
            }
        });
        let mask = TextureDetector::default().detect(&gray);
        assert!(mask.is_set(30, 30));
        assert!(!mask.is_set(70, 70));
    }
}
