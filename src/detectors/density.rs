//! Gradient edge density.
//!
//! Text and line-art marks produce many edges per unit area regardless of
//! how strong each edge is. Edges are found with a Sobel magnitude threshold
//! and then averaged over a wide window.

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use super::{Detector, DENSITY};
use crate::filter::box_mean;
use crate::raster::{ConfidenceMap, MASK_ON};

/// Edge-density detector.
#[derive(Debug, Clone)]
pub struct DensityDetector {
    /// Normalized gradient magnitude strictly above this is an edge.
    pub edge_level: u8,
    /// Side of the square density window.
    pub window: usize,
    /// Normalized density strictly above this counts as a detection.
    pub density_level: u8,
}

impl Default for DensityDetector {
    fn default() -> Self {
        Self {
            edge_level: 20,
            window: 25,
            density_level: 30,
        }
    }
}

impl Detector for DensityDetector {
    fn name(&self) -> &'static str {
        DENSITY
    }

    fn confidence(&self, gray: &GrayImage) -> ConfidenceMap {
        let (w, h) = gray.dimensions();
        let gx = horizontal_sobel(gray);
        let gy = vertical_sobel(gray);
        let magnitude: Vec<f32> = gx
            .iter()
            .zip(gy.iter())
            .map(|(&dx, &dy)| f32::from(dx).hypot(f32::from(dy)))
            .collect();

        let edges = ConfidenceMap::from_normalized(&magnitude, w, h).threshold(self.edge_level);
        if edges.is_empty() {
            return ConfidenceMap::empty(w, h);
        }

        let edge_values: Vec<f32> = edges
            .as_image()
            .iter()
            .map(|&v| if v == MASK_ON { 255.0 } else { 0.0 })
            .collect();
        let density = box_mean(&edge_values, w as usize, h as usize, self.window, self.window);
        ConfidenceMap::from_normalized(&density, w, h)
    }

    fn decision_level(&self) -> u8 {
        self.density_level
    }
}
