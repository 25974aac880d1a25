//! Automatic watermark segmentation.
//!
//! Runs every registered detector, the subject protector and the saliency
//! gate on one grayscale projection, fuses the results and refines them into
//! the final mask.

use std::sync::Arc;

use tracing::debug;

use crate::detectors::{
    Detector, DensityDetector, PeriodicDetector, StructuralDetector, TextureDetector,
};
use crate::fusion::{default_groups, fuse, Fusion, SignalGroup, Signals};
use crate::protect::{FaceDetector, SubjectProtector};
use crate::raster::{Mask, Raster};
use crate::refine::{MaskRefiner, Refinement};
use crate::saliency::SpectralResidualSaliency;

/// Every tunable of the detection pipeline.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Texture-variance detector.
    pub texture: TextureDetector,
    /// Edge-density detector.
    pub density: DensityDetector,
    /// Structural-region detector.
    pub structural: StructuralDetector,
    /// Periodic-line detector.
    pub periodic: PeriodicDetector,
    /// Face and edge protection.
    pub protector: SubjectProtector,
    /// Saliency gate.
    pub saliency: SpectralResidualSaliency,
    /// Post-fusion refinement.
    pub refiner: MaskRefiner,
    /// Detector groups that must agree.
    pub groups: Vec<SignalGroup>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            texture: TextureDetector::default(),
            density: DensityDetector::default(),
            structural: StructuralDetector::default(),
            periodic: PeriodicDetector::default(),
            protector: SubjectProtector::default(),
            saliency: SpectralResidualSaliency::default(),
            refiner: MaskRefiner::default(),
            groups: default_groups(),
        }
    }
}

/// All intermediate masks of one segmentation.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Per-detector binary masks.
    pub signals: Signals,
    /// Pixels that must never be modified.
    pub protection: Mask,
    /// Salient pixels.
    pub saliency: Mask,
    /// Group, candidate and gated masks.
    pub fusion: Fusion,
    /// Refinement steps applied to the fused mask.
    pub refinement: Refinement,
    /// Final mask: refined, with protection re-applied.
    pub mask: Mask,
}

impl Segmentation {
    /// Named masks in pipeline order, for debug dumps.
    #[must_use]
    pub fn layers(&self) -> Vec<(String, &Mask)> {
        let mut layers: Vec<(String, &Mask)> = self
            .signals
            .iter()
            .map(|(name, mask)| (format!("signal_{name}"), mask))
            .collect();
        layers.push(("protection".to_string(), &self.protection));
        layers.push(("saliency".to_string(), &self.saliency));
        layers.extend(
            self.fusion
                .groups
                .iter()
                .map(|(name, mask)| (format!("group_{name}"), mask)),
        );
        layers.push(("candidate".to_string(), &self.fusion.candidate));
        layers.push(("gated".to_string(), &self.fusion.gated));
        layers.push(("fused".to_string(), &self.fusion.fused));
        layers.push(("closed".to_string(), &self.refinement.closed));
        layers.push(("snapped".to_string(), &self.refinement.snapped));
        layers.push(("filtered".to_string(), &self.refinement.filtered));
        layers.push(("mask".to_string(), &self.mask));
        layers
    }
}

/// Detector set plus fusion policy.
pub struct Segmenter {
    detectors: Vec<Box<dyn Detector>>,
    groups: Vec<SignalGroup>,
    protector: SubjectProtector,
    saliency: SpectralResidualSaliency,
    refiner: MaskRefiner,
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.detectors.iter().map(|d| d.name()).collect();
        f.debug_struct("Segmenter")
            .field("detectors", &names)
            .field("groups", &self.groups)
            .field("protector", &self.protector)
            .finish_non_exhaustive()
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}

impl Segmenter {
    /// Build the four built-in detectors from `config`.
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            detectors: vec![
                Box::new(config.texture),
                Box::new(config.density),
                Box::new(config.structural),
                Box::new(config.periodic),
            ],
            groups: config.groups,
            protector: config.protector,
            saliency: config.saliency,
            refiner: config.refiner,
        }
    }

    /// Register a detector, replacing any existing one with the same name.
    #[must_use]
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detectors.retain(|d| d.name() != detector.name());
        self.detectors.push(detector);
        self
    }

    /// Add a signal group to the fusion policy.
    #[must_use]
    pub fn with_group(mut self, group: SignalGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Protect faces found by `detector`.
    #[must_use]
    pub fn with_face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.protector = self.protector.with_face_detector(detector);
        self
    }

    /// Whether faces are protected.
    #[must_use]
    pub fn protects_faces(&self) -> bool {
        self.protector.has_face_detector()
    }

    /// Final mask only.
    #[must_use]
    pub fn detect(&self, image: &Raster) -> Mask {
        self.segment(image).mask
    }

    /// Run the full detection pipeline.
    #[must_use]
    pub fn segment(&self, image: &Raster) -> Segmentation {
        let gray = image.to_gray();

        let mut signals = Signals::default();
        for detector in &self.detectors {
            let mask = detector.detect(&gray);
            debug!(detector = detector.name(), area = mask.area(), "signal");
            signals.insert(detector.name(), mask);
        }

        let protection = self.protector.protect(&gray);
        let saliency = self.saliency.gate(&gray);
        let fusion = fuse(&signals, &self.groups, &saliency, &protection);
        let refinement = self.refiner.refine_stages(&fusion.fused);
        // Closing and dilation can grow back into protected pixels.
        let mask = refinement.dilated.and_not(&protection);

        debug!(
            protection = protection.area(),
            saliency = saliency.area(),
            candidate = fusion.candidate.area(),
            fused = fusion.fused.area(),
            refined = refinement.dilated.area(),
            mask = mask.area(),
            "segmentation"
        );

        Segmentation {
            signals,
            protection,
            saliency,
            fusion,
            refinement,
            mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ConfidenceMap;
    use image::{GrayImage, Luma};

    /// Fires on every pixel.
    struct Everywhere(&'static str);

    impl Detector for Everywhere {
        fn name(&self) -> &'static str {
            self.0
        }

        fn confidence(&self, gray: &GrayImage) -> ConfidenceMap {
            let (w, h) = gray.dimensions();
            ConfidenceMap::from_gray(GrayImage::from_pixel(w, h, Luma([255])))
        }
    }

    #[test]
    fn uniform_image_yields_empty_mask() {
        let image = Raster::Gray(GrayImage::from_pixel(96, 64, Luma([128])));
        let seg = Segmenter::default().segment(&image);
        assert!(seg.mask.is_empty());
        assert_eq!(seg.mask.dimensions(), (96, 64));
    }

    #[test]
    fn replaced_detector_keeps_one_entry_per_name() {
        let segmenter = Segmenter::default().with_detector(Box::new(Everywhere("texture")));
        assert_eq!(segmenter.detectors.len(), 4);
    }

    #[test]
    fn custom_group_feeds_the_candidate() {
        let image = Raster::Gray(GrayImage::from_fn(64, 64, |x, y| Luma([((x * y) % 256) as u8])));
        let segmenter = Segmenter::default()
            .with_detector(Box::new(Everywhere("always")))
            .with_group(SignalGroup::new("always", &["always"]));
        let seg = segmenter.segment(&image);
        assert_eq!(seg.fusion.candidate.area(), 64 * 64);
        assert!(seg.mask.and(&seg.protection).is_empty());
    }

    #[test]
    fn layers_are_named_uniquely() {
        let image = Raster::Gray(GrayImage::from_pixel(32, 32, Luma([10])));
        let seg = Segmenter::default().segment(&image);
        let mut names: Vec<_> = seg.layers().into_iter().map(|(n, _)| n).collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), before);
    }
}
