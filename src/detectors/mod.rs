//! Independent watermark signal detectors.
//!
//! Every detector looks at the same grayscale projection of the source image
//! and reports a [`ConfidenceMap`]. Detectors never fail: finding nothing is
//! an ordinary outcome and yields an empty map.
//!
//! The four built-in detectors each target one signal family:
//!
//! | Detector | Signal |
//! |---|---|
//! | [`TextureDetector`] | local standard deviation, faint semi-transparent overlays |
//! | [`DensityDetector`] | density of gradient edges, text-like regions |
//! | [`StructuralDetector`] | stable extremal regions, glyph and logo shapes |
//! | [`PeriodicDetector`] | dominant-angle diagonal lines, tiled watermark grids |

mod density;
mod mser;
mod periodic;
mod structural;
mod texture;

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;

use crate::raster::{ConfidenceMap, Mask, MASK_ON};

pub use density::DensityDetector;
pub use mser::{detect_regions, MserParams};
pub use periodic::{LineSegment, PeriodicDetector};
pub use structural::StructuralDetector;
pub use texture::TextureDetector;

/// Name of the texture-variance detector.
pub const TEXTURE: &str = "texture";
/// Name of the edge-density detector.
pub const DENSITY: &str = "density";
/// Name of the structural-region detector.
pub const STRUCTURAL: &str = "structural";
/// Name of the periodic-line detector.
pub const PERIODIC: &str = "periodic";

/// A source of watermark evidence.
///
/// Implementations are pure functions of the grayscale image. New detectors
/// can be registered with a [`Segmenter`](crate::Segmenter) and referenced by
/// name from a [`SignalGroup`](crate::fusion::SignalGroup) without touching
/// the fusion logic.
pub trait Detector: Send + Sync {
    /// Stable name used by signal groups and debug output.
    fn name(&self) -> &'static str;

    /// Graded confidence for every pixel of `gray`.
    fn confidence(&self, gray: &GrayImage) -> ConfidenceMap;

    /// Confidence values strictly above this level count as detections.
    ///
    /// Detectors that already emit binary maps keep the default of zero.
    fn decision_level(&self) -> u8 {
        0
    }

    /// Binary detection mask: [`confidence`](Self::confidence) thresholded at
    /// [`decision_level`](Self::decision_level).
    fn detect(&self, gray: &GrayImage) -> Mask {
        self.confidence(gray).threshold(self.decision_level())
    }
}

/// The four built-in detectors with their default parameters.
#[must_use]
pub fn default_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(TextureDetector::default()),
        Box::new(DensityDetector::default()),
        Box::new(StructuralDetector::default()),
        Box::new(PeriodicDetector::default()),
    ]
}

/// Intensities of a grayscale image as `f32`.
pub(crate) fn gray_values(gray: &GrayImage) -> Vec<f32> {
    gray.as_raw().iter().map(|&v| f32::from(v)).collect()
}

/// Fill a polygon, tolerating repeated and collapsed vertices.
///
/// Fewer than three distinct vertices are drawn as a line or a single pixel.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn fill_polygon(canvas: &mut GrayImage, vertices: &[Point<i32>]) {
    let on = Luma([MASK_ON]);
    let mut polygon = vertices.to_vec();
    polygon.dedup();
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    match polygon.as_slice() {
        [] => {}
        [p] => {
            if let (Ok(x), Ok(y)) = (u32::try_from(p.x), u32::try_from(p.y)) {
                if x < canvas.width() && y < canvas.height() {
                    canvas.put_pixel(x, y, on);
                }
            }
        }
        [a, b] => draw_line_segment_mut(
            canvas,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            on,
        ),
        _ => draw_polygon_mut(canvas, &polygon, on),
    }
}
