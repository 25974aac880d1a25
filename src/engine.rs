//! Request pipeline: load, choose a mask, inpaint, composite, save.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, info, warn};

use crate::composite::Compositor;
use crate::error::{Error, ErrorCategory, Result};
use crate::inpaint::{InpaintBackend, NeuralInpainter};
use crate::model::{InpaintConfig, OnnxInpaintModel};
use crate::protect::SeetaFaceDetector;
use crate::raster::{Mask, Raster};
use crate::segment::{Segmentation, Segmenter, SegmenterConfig};

/// Where the removal mask comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskSource {
    /// Detect the watermark automatically.
    Auto,
    /// Read a user-supplied mask image.
    File(PathBuf),
}

impl MaskSource {
    /// Literal accepted in place of a mask path to request auto-detection.
    pub const AUTO_SENTINEL: &'static str = "AUTO";

    /// Interpret a mask argument; [`AUTO_SENTINEL`](Self::AUTO_SENTINEL) and
    /// the empty string mean auto-detection.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.is_empty() || value == Self::AUTO_SENTINEL {
            Self::Auto
        } else {
            Self::File(PathBuf::from(value))
        }
    }
}

/// Everything needed to build a [`RemovalEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Detection pipeline settings.
    pub segmenter: SegmenterConfig,
    /// Inpainting model settings.
    pub inpaint: InpaintConfig,
    /// Compositing settings.
    pub compositor: Compositor,
    /// SeetaFace model used for face protection; the bundled frontal
    /// model when unset.
    pub face_model: Option<PathBuf>,
    /// Turn face protection off entirely.
    pub skip_face_protection: bool,
}

impl EngineConfig {
    /// Detection pipeline for this configuration, face detector included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FaceModel`] if the face model cannot be parsed.
    pub fn build_segmenter(&self) -> Result<Segmenter> {
        let segmenter = Segmenter::new(self.segmenter.clone());
        if self.skip_face_protection {
            warn!("face protection disabled, faces may be inpainted");
            return Ok(segmenter);
        }
        let detector = match &self.face_model {
            Some(path) => SeetaFaceDetector::from_file(path)?,
            None => SeetaFaceDetector::bundled()?,
        };
        Ok(segmenter.with_face_detector(Arc::new(detector)))
    }
}

/// Options controlling one processing request.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Dilate the removal mask before inpainting. Auto masks keep clear of
    /// protected pixels after dilation.
    pub dilate_mask: bool,
    /// User mask pixels strictly above this gray level are active.
    pub mask_level: u8,
    /// Radius of the square dilation applied to removal masks.
    pub mask_radius: u8,
    /// Write the mask instead of inpainting.
    pub detect_only: bool,
    /// Directory receiving intermediate masks as PNGs.
    pub debug_dir: Option<PathBuf>,
    /// Enable verbose logging.
    pub verbose: bool,
    /// Suppress non-error output.
    pub quiet: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            dilate_mask: true,
            mask_level: 15,
            mask_radius: 2,
            detect_only: false,
            debug_dir: None,
            verbose: false,
            quiet: false,
        }
    }
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Where the result was written, if anywhere.
    pub output: Option<PathBuf>,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether the output is identical to the input (empty mask).
    pub unchanged: bool,
    /// Active pixels in the mask that was used.
    pub mask_area: u64,
    /// Failure class, for failed requests.
    pub category: Option<ErrorCategory>,
    /// Human-readable status message.
    pub message: String,
}

/// Successful request outcome before it is turned into a [`ProcessResult`].
struct Outcome {
    mask_area: u64,
    unchanged: bool,
    message: String,
}

/// Detection, inpainting and compositing, ready to serve requests.
///
/// Create once and reuse: the inpainting model is loaded a single time and
/// shared by every call, including parallel batch processing.
#[derive(Debug)]
pub struct RemovalEngine {
    segmenter: Segmenter,
    inpainter: NeuralInpainter,
    compositor: Compositor,
}

impl RemovalEngine {
    /// Build an engine backed by the configured ONNX model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FaceModel`] if the face model cannot be read, and
    /// [`Error::ModelNotFound`] or [`Error::ModelLoad`] if the inpainting
    /// model cannot be used.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let segmenter = config.build_segmenter()?;
        let model = OnnxInpaintModel::load(&config.inpaint)?;
        Ok(Self::with_backend(segmenter, Arc::new(model), config.compositor))
    }

    /// Build an engine around any inpainting backend.
    #[must_use]
    pub fn with_backend(
        segmenter: Segmenter,
        backend: Arc<dyn InpaintBackend>,
        compositor: Compositor,
    ) -> Self {
        Self {
            segmenter,
            inpainter: NeuralInpainter::new(backend),
            compositor,
        }
    }

    /// The detection pipeline.
    #[must_use]
    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    /// Run automatic detection, keeping every intermediate mask.
    #[must_use]
    pub fn detect(&self, image: &Raster) -> Segmentation {
        self.segmenter.segment(image)
    }

    /// Auto-detected removal mask, prepared like a user mask.
    ///
    /// The detected mask is dilated by
    /// [`mask_radius`](ProcessOptions::mask_radius) unless disabled, then
    /// protected pixels are cleared again.
    #[must_use]
    pub fn prepare_auto_mask(&self, segmentation: &Segmentation, opts: &ProcessOptions) -> Mask {
        if !opts.dilate_mask {
            return segmentation.mask.clone();
        }
        segmentation
            .mask
            .dilate(opts.mask_radius)
            .and_not(&segmentation.protection)
    }

    /// Load a user mask and prepare it for `image`.
    ///
    /// The mask is thresholded at
    /// [`mask_level`](ProcessOptions::mask_level), scaled to the
    /// image with nearest-neighbour sampling and, unless disabled, dilated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaskLoad`] if the mask cannot be read.
    pub fn load_user_mask(
        &self,
        path: &Path,
        image: &Raster,
        opts: &ProcessOptions,
    ) -> Result<Mask> {
        let (w, h) = image.dimensions();
        let mask = Mask::open(path, opts.mask_level)?.resize_nearest(w, h);
        if opts.dilate_mask {
            Ok(mask.dilate(opts.mask_radius))
        } else {
            Ok(mask)
        }
    }

    /// Remove the masked region from `image`.
    ///
    /// An empty mask returns the image untouched without running the model.
    ///
    /// # Errors
    ///
    /// Returns model and shape errors from inpainting.
    pub fn remove(&self, image: &Raster, mask: &Mask) -> Result<Raster> {
        if mask.is_empty() {
            debug!("empty mask, skipping inference");
            return Ok(image.clone());
        }
        let prediction = self.inpainter.inpaint(image, mask)?;
        self.compositor.apply(image, &prediction, mask)
    }

    /// Process a single image file: load, mask, remove, save.
    ///
    /// Never panics or returns early on failure; the returned
    /// [`ProcessResult`] carries the outcome and, on failure, its category.
    #[must_use]
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        mask: &MaskSource,
        opts: &ProcessOptions,
    ) -> ProcessResult {
        match self.run(input, output, mask, opts) {
            Ok(outcome) => {
                info!(
                    input = %input.display(),
                    output = %output.display(),
                    mask_area = outcome.mask_area,
                    "{}",
                    outcome.message
                );
                ProcessResult {
                    path: input.to_path_buf(),
                    output: Some(output.to_path_buf()),
                    success: true,
                    unchanged: outcome.unchanged,
                    mask_area: outcome.mask_area,
                    category: None,
                    message: outcome.message,
                }
            }
            Err(e) => {
                warn!(input = %input.display(), error = %e, "request failed");
                ProcessResult {
                    path: input.to_path_buf(),
                    output: None,
                    success: false,
                    unchanged: false,
                    mask_area: 0,
                    category: Some(e.category()),
                    message: e.to_string(),
                }
            }
        }
    }

    fn run(
        &self,
        input: &Path,
        output: &Path,
        source: &MaskSource,
        opts: &ProcessOptions,
    ) -> Result<Outcome> {
        let image = Raster::open(input)?;
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();

        let mask = match source {
            MaskSource::Auto => {
                let segmentation = self.segmenter.segment(&image);
                let mask = self.prepare_auto_mask(&segmentation, opts);
                if let Some(dir) = &opts.debug_dir {
                    let mut layers = segmentation.layers();
                    layers.push(("prepared".to_string(), &mask));
                    dump_masks(dir, &stem, &layers)?;
                }
                mask
            }
            MaskSource::File(path) => {
                let mask = self.load_user_mask(path, &image, opts)?;
                if let Some(dir) = &opts.debug_dir {
                    dump_masks(dir, &stem, &[("mask".to_string(), &mask)])?;
                }
                mask
            }
        };
        let mask_area = mask.area();

        if opts.detect_only {
            save_image(&Raster::Gray(mask.into_image()), output)?;
            return Ok(Outcome {
                mask_area,
                unchanged: true,
                message: format!("Mask written ({mask_area} px)"),
            });
        }

        let cleaned = self.remove(&image, &mask)?;
        save_image(&cleaned, output)?;
        let message = if mask_area == 0 {
            "No watermark detected, output unchanged".to_string()
        } else {
            format!("Watermark removed ({mask_area} px)")
        };
        Ok(Outcome {
            mask_area,
            unchanged: mask_area == 0,
            message,
        })
    }

    /// Process all supported images in a directory with auto-detected masks.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    /// Returns a [`ProcessResult`] for each image found.
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        opts: &ProcessOptions,
    ) -> Vec<ProcessResult> {
        let failure = |path: &Path, e: &std::io::Error, what: &str| ProcessResult {
            path: path.to_path_buf(),
            output: None,
            success: false,
            unchanged: false,
            mask_area: 0,
            category: Some(ErrorCategory::Output),
            message: format!("Failed to {what}: {e}"),
        };

        let jobs: Vec<(PathBuf, PathBuf)> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_ok_and(|ft| ft.is_file()))
                .map(|e| e.path())
                .filter(|p| is_supported_image(p))
                .filter_map(|p| {
                    let target = if opts.detect_only {
                        output_dir.join(default_mask_path(&p).file_name()?)
                    } else {
                        output_dir.join(p.file_name()?)
                    };
                    Some((p, target))
                })
                .collect(),
            Err(e) => {
                let mut result = failure(input_dir, &e, "read directory");
                result.category = Some(ErrorCategory::Input);
                return vec![result];
            }
        };

        if let Err(e) = std::fs::create_dir_all(output_dir) {
            return vec![failure(output_dir, &e, "create output directory")];
        }

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            jobs.par_iter()
                .map(|(input, output)| self.process_file(input, output, &MaskSource::Auto, opts))
                .collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            jobs.iter()
                .map(|(input, output)| self.process_file(input, output, &MaskSource::Auto, opts))
                .collect()
        }
    }
}

/// Write named masks as `<stem>_<name>.png` into `dir`.
fn dump_masks(dir: &Path, stem: &str, layers: &[(String, &Mask)]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for (name, mask) in layers {
        let path = dir.join(format!("{stem}_{name}.png"));
        mask.as_image()
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|source| Error::ImageSave { path, source })?;
    }
    Ok(())
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tif" | "tiff"
        ),
        None => false,
    }
}

/// Encode an image for `path` and write it in one step.
///
/// JPEG is written at quality 100 (alpha dropped); PNG, BMP, WebP and TIFF
/// are lossless. Nothing is written if encoding fails.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] for other extensions,
/// [`Error::ImageSave`] if encoding fails and [`Error::Io`] if writing fails.
pub fn save_image(image: &Raster, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    let save_err = |source| Error::ImageSave {
        path: path.to_path_buf(),
        source,
    };

    let mut buffer = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            let flat = match image {
                Raster::Rgba(_) => DynamicImage::ImageRgb8(image.to_rgb()),
                other => other.clone().into_dynamic(),
            };
            let encoder = JpegEncoder::new_with_quality(&mut buffer, 100);
            flat.write_with_encoder(encoder).map_err(save_err)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp | ImageFormat::Tiff => {
            image
                .clone()
                .into_dynamic()
                .write_to(&mut buffer, format)
                .map_err(save_err)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, buffer.into_inner())?;
    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_cleaned.jpg"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_cleaned.{ext}"))
}

/// Default destination of a detect-only mask.
///
/// Example: `"photo.jpg"` becomes `"photo_mask.png"`.
#[must_use]
pub fn default_mask_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_mask.png"))
}
