//! Detect overlaid watermarks and logos and remove them by neural inpainting.
//!
//! Removal is surgical: a binary mask decides which pixels may change, a
//! LaMa-style ONNX model predicts their content, and every pixel outside the
//! mask is copied byte-for-byte from the source.
//!
//! # Quick Start
//!
//! ```no_run
//! use watermark_inpaint::{save_image, EngineConfig, Raster, RemovalEngine};
//!
//! let engine = RemovalEngine::new(EngineConfig::default()).expect("failed to init engine");
//! let image = Raster::open("photo.jpg".as_ref()).unwrap();
//! let mask = engine.segmenter().detect(&image);
//! let cleaned = engine.remove(&image, &mask).unwrap();
//! save_image(&cleaned, "cleaned.jpg".as_ref()).unwrap();
//! ```
//!
//! # Detection
//!
//! Automatic masks come from several independent detectors fused with
//! subject protection and a saliency gate. Faces and strong edges are never
//! selected, so a missed watermark is preferred over a damaged subject.
//!
//! ```no_run
//! use watermark_inpaint::{Raster, Segmenter};
//!
//! let image = Raster::open("photo.jpg".as_ref()).unwrap();
//! let seg = Segmenter::default().segment(&image);
//! for (name, mask) in seg.layers() {
//!     println!("{name}: {} px", mask.area());
//! }
//! ```

#![deny(missing_docs)]

pub mod composite;
pub mod detectors;
mod engine;
pub mod error;
mod filter;
pub mod fusion;
pub mod inpaint;
pub mod model;
pub mod protect;
pub mod raster;
pub mod refine;
pub mod saliency;
mod segment;

pub use composite::Compositor;
pub use detectors::Detector;
pub use engine::{
    default_mask_path, default_output_path, is_supported_image, save_image, EngineConfig,
    MaskSource, ProcessOptions, ProcessResult, RemovalEngine,
};
pub use error::{Error, ErrorCategory, Result};
pub use inpaint::{InpaintBackend, NeuralInpainter};
pub use model::{InpaintConfig, OnnxInpaintModel};
pub use protect::{FaceDetector, FaceRegion, SeetaFaceDetector, SubjectProtector};
pub use raster::{ConfidenceMap, Mask, Raster};
pub use refine::MaskRefiner;
pub use saliency::SpectralResidualSaliency;
pub use segment::{Segmentation, Segmenter, SegmenterConfig};
