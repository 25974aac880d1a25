//! Subject protection.
//!
//! Faces and strong structural edges belong to the photograph, not the
//! watermark. The protection mask marks them so that no later stage can
//! modify those pixels.

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::edges::canny;
use imageproc::rect::Rect;
use tracing::debug;

use crate::error::{Error, Result};
use crate::raster::{Mask, MASK_ON};

/// Bounding box of a detected face, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    /// Left edge; may be negative for faces cut by the border.
    pub x: i32,
    /// Top edge; may be negative for faces cut by the border.
    pub y: i32,
    /// Box width.
    pub width: u32,
    /// Box height.
    pub height: u32,
}

impl FaceRegion {
    /// The face box grown to cover hair and forehead.
    ///
    /// Extends a quarter of the width on each side and a third of the height
    /// upwards. The bottom edge is unchanged.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn expanded(&self) -> (i32, i32, i32, i32) {
        let (w, h) = (self.width as i32, self.height as i32);
        (
            self.x - w / 4,
            self.y - h / 3,
            self.x + w + w / 4,
            self.y + h,
        )
    }
}

/// Pluggable face detection backend.
///
/// Implement this to use a different detector and pass it to
/// [`SubjectProtector::with_face_detector`].
pub trait FaceDetector: Send + Sync {
    /// Faces found in a grayscale image.
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRegion>;
}

/// SeetaFace frontal cascade shipped with the crate.
const BUNDLED_FACE_MODEL: &[u8] = include_bytes!("../models/seeta_fd_frontal_v1.0.bin");

/// Frontal face detector backed by a SeetaFace cascade model.
///
/// The model is parsed once; every detection starts from a copy of it.
#[derive(Clone)]
pub struct SeetaFaceDetector {
    model: rustface::Model,
    origin: String,
    /// Smallest face side considered, in pixels.
    pub min_face_size: u32,
    /// Classifier score a window must exceed.
    pub score_threshold: f64,
    /// Image pyramid down-scaling step.
    pub pyramid_scale: f32,
    /// Sliding window stride, in pixels.
    pub window_step: u32,
}

impl fmt::Debug for SeetaFaceDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeetaFaceDetector")
            .field("origin", &self.origin)
            .field("min_face_size", &self.min_face_size)
            .field("score_threshold", &self.score_threshold)
            .finish_non_exhaustive()
    }
}

impl SeetaFaceDetector {
    /// Detector using the frontal face model bundled with the crate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FaceModel`] if the bundled model fails to parse.
    pub fn bundled() -> Result<Self> {
        Self::from_bytes(BUNDLED_FACE_MODEL, Path::new("<bundled>"))
    }

    /// Load and parse a model file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FaceModel`] if the file is missing or is not a
    /// valid cascade model.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::FaceModel {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes, path)
    }

    fn from_bytes(bytes: &[u8], origin: &Path) -> Result<Self> {
        let model = rustface::read_model(Cursor::new(bytes)).map_err(|e| Error::FaceModel {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(origin = %origin.display(), bytes = bytes.len(), "face model loaded");
        Ok(Self {
            model,
            origin: origin.display().to_string(),
            min_face_size: 20,
            score_threshold: 2.0,
            pyramid_scale: 0.8,
            window_step: 4,
        })
    }
}

impl FaceDetector for SeetaFaceDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRegion> {
        let (w, h) = gray.dimensions();
        if w < self.min_face_size || h < self.min_face_size {
            return Vec::new();
        }
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(self.score_threshold);
        detector.set_pyramid_scale_factor(self.pyramid_scale);
        detector.set_slide_window_step(self.window_step, self.window_step);

        let mut image = rustface::ImageData::new(gray.as_raw(), w, h);
        detector
            .detect(&mut image)
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceRegion {
                    x: bbox.x(),
                    y: bbox.y(),
                    width: bbox.width(),
                    height: bbox.height(),
                }
            })
            .collect()
    }
}

/// Builds the protection mask: expanded faces plus dilated strong edges.
#[derive(Clone)]
pub struct SubjectProtector {
    face_detector: Option<Arc<dyn FaceDetector>>,
    /// Canny low threshold for subject edges.
    pub edge_low: f32,
    /// Canny high threshold for subject edges.
    pub edge_high: f32,
    /// Radius of the square dilation kernel applied to edges.
    pub dilation_radius: u8,
    /// Number of dilation passes.
    pub dilation_iterations: u8,
}

impl fmt::Debug for SubjectProtector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectProtector")
            .field("face_detector", &self.face_detector.is_some())
            .field("edge_low", &self.edge_low)
            .field("edge_high", &self.edge_high)
            .field("dilation_radius", &self.dilation_radius)
            .field("dilation_iterations", &self.dilation_iterations)
            .finish()
    }
}

impl Default for SubjectProtector {
    fn default() -> Self {
        Self {
            face_detector: None,
            edge_low: 100.0,
            edge_high: 200.0,
            dilation_radius: 2,
            dilation_iterations: 3,
        }
    }
}

impl SubjectProtector {
    /// Use `detector` for face protection.
    #[must_use]
    pub fn with_face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.face_detector = Some(detector);
        self
    }

    /// Whether a face detector is configured.
    #[must_use]
    pub fn has_face_detector(&self) -> bool {
        self.face_detector.is_some()
    }

    /// Protection mask for `gray`.
    #[must_use]
    pub fn protect(&self, gray: &GrayImage) -> Mask {
        let faces = self.face_mask(gray);
        let edges = self.edge_mask(gray);
        faces.or(&edges)
    }

    /// Expanded face rectangles, clipped to the image.
    #[must_use]
    pub fn face_mask(&self, gray: &GrayImage) -> Mask {
        let (w, h) = gray.dimensions();
        let Some(detector) = &self.face_detector else {
            return Mask::empty(w, h);
        };
        let faces = detector.detect(gray);
        debug!(faces = faces.len(), "face detection");

        let mut canvas = GrayImage::new(w, h);
        for face in &faces {
            let (x0, y0, x1, y1) = face.expanded();
            #[allow(clippy::cast_possible_wrap)]
            let (x0, y0) = (x0.max(0), y0.max(0));
            #[allow(clippy::cast_possible_wrap)]
            let (x1, y1) = (x1.min(w as i32 - 1), y1.min(h as i32 - 1));
            if x1 < x0 || y1 < y0 {
                continue;
            }
            #[allow(clippy::cast_sign_loss)]
            let rect = Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
            draw_filled_rect_mut(&mut canvas, rect, Luma([MASK_ON]));
        }
        Mask::from_nonzero(&canvas)
    }

    /// Strong Canny edges dilated by the configured kernel.
    #[must_use]
    pub fn edge_mask(&self, gray: &GrayImage) -> Mask {
        let (w, h) = gray.dimensions();
        if w < 3 || h < 3 {
            return Mask::empty(w, h);
        }
        let edges = Mask::from_nonzero(&canny(gray, self.edge_low, self.edge_high));
        // Repeated square dilations compose into one wider square.
        let radius = self
            .dilation_radius
            .saturating_mul(self.dilation_iterations);
        edges.dilate(radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFaces(Vec<FaceRegion>);

    impl FaceDetector for FixedFaces {
        fn detect(&self, _gray: &GrayImage) -> Vec<FaceRegion> {
            self.0.clone()
        }
    }

    #[test]
    fn face_box_is_expanded_and_clipped() {
        let face = FaceRegion {
            x: 4,
            y: 6,
            width: 20,
            height: 12,
        };
        assert_eq!(face.expanded(), (-1, 2, 29, 18));

        let protector =
            SubjectProtector::default().with_face_detector(Arc::new(FixedFaces(vec![face])));
        let mask = protector.face_mask(&GrayImage::new(25, 25));
        assert!(mask.is_set(0, 2));
        assert!(mask.is_set(24, 18));
        assert!(!mask.is_set(10, 1));
        assert!(!mask.is_set(10, 19));
    }

    #[test]
    fn no_detector_protects_no_faces() {
        let mask = SubjectProtector::default().face_mask(&GrayImage::new(10, 10));
        assert!(mask.is_empty());
    }

    #[test]
    fn strong_edge_is_protected_with_margin() {
        let gray = GrayImage::from_fn(60, 60, |x, _| if x < 30 { Luma([0]) } else { Luma([255]) });
        let mask = SubjectProtector::default().protect(&gray);
        assert!(mask.is_set(30, 30));
        assert!(mask.is_set(24, 30));
        assert!(!mask.is_set(5, 30));
    }

    #[test]
    fn bundled_face_model_parses() {
        let detector = SeetaFaceDetector::bundled().expect("bundled model");
        assert!(format!("{detector:?}").contains("<bundled>"));
        let flat = GrayImage::from_pixel(64, 64, Luma([128]));
        assert!(detector.detect(&flat).is_empty());
        assert!(detector.detect(&GrayImage::new(8, 8)).is_empty());
    }

    #[test]
    fn corrupt_face_model_is_rejected_on_load() {
        let path = std::env::temp_dir().join("watermark_inpaint_bad_face_model.bin");
        std::fs::write(&path, [1u8, 0]).expect("write");
        let err = SeetaFaceDetector::from_file(&path).expect_err("corrupt model");
        assert!(matches!(err, Error::FaceModel { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn flat_image_needs_no_protection() {
        let gray = GrayImage::from_pixel(40, 40, Luma([77]));
        assert!(SubjectProtector::default().protect(&gray).is_empty());
    }
}
