//! Structural shapes from stable extremal regions.
//!
//! Glyphs and logo strokes form compact regions whose area barely changes
//! across a range of thresholds. Each such region is replaced by its filled
//! convex hull.

use image::GrayImage;
use imageproc::geometry::convex_hull;
use imageproc::point::Point;

use super::mser::{detect_regions, MserParams};
use super::{fill_polygon, Detector, STRUCTURAL};
use crate::raster::ConfidenceMap;

/// Filled convex hulls of MSER regions.
#[derive(Debug, Clone, Default)]
pub struct StructuralDetector {
    /// Region extraction parameters.
    pub params: MserParams,
}

impl Detector for StructuralDetector {
    fn name(&self) -> &'static str {
        STRUCTURAL
    }

    fn confidence(&self, gray: &GrayImage) -> ConfidenceMap {
        let (w, h) = gray.dimensions();
        let mut map = GrayImage::new(w, h);
        for region in detect_regions(gray, &self.params) {
            fill_hull(&mut map, &region);
        }
        ConfidenceMap::from_gray(map)
    }
}

/// Paint the convex hull of `points` into `canvas`.
fn fill_hull(canvas: &mut GrayImage, points: &[Point<i32>]) {
    fill_polygon(canvas, &convex_hull(points));
}
