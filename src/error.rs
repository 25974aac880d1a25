//! Error types for the watermark-inpaint crate.

use std::path::PathBuf;

/// Coarse classification of an [`Error`], reported back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or unloadable model resources. Fatal for the process.
    Resource,
    /// Unreadable or undecodable image or mask. Fatal for the request.
    Input,
    /// The result could not be encoded or written.
    Output,
    /// The model produced something the pipeline cannot use.
    Integration,
}

/// Errors that can occur during watermark detection and removal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The inpainting model file does not exist.
    #[error("inpainting model not found at {}", path.display())]
    ModelNotFound {
        /// Expected model location.
        path: PathBuf,
    },

    /// The inpainting model exists but could not be loaded.
    #[error("failed to load inpainting model {}: {reason}", path.display())]
    ModelLoad {
        /// Model location.
        path: PathBuf,
        /// Runtime-provided failure description.
        reason: String,
    },

    /// The inference runtime failed while running the model.
    #[error("model inference failed: {0}")]
    Inference(String),

    /// The model returned a tensor of an unexpected shape.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Shape the pipeline requires.
        expected: String,
        /// Shape the model produced.
        actual: String,
    },

    /// The source image could not be read or decoded.
    #[error("failed to load image from {}: {source}", path.display())]
    ImageLoad {
        /// Failing path.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: image::ImageError,
    },

    /// The user-supplied mask could not be read or decoded.
    #[error("failed to load mask from {}: {source}", path.display())]
    MaskLoad {
        /// Failing path.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: image::ImageError,
    },

    /// The result image could not be encoded or written.
    #[error("failed to save image to {}: {source}", path.display())]
    ImageSave {
        /// Destination path.
        path: PathBuf,
        /// Underlying encode error.
        #[source]
        source: image::ImageError,
    },

    /// The face detection model could not be loaded.
    #[error("failed to load face model {}: {reason}", path.display())]
    FaceModel {
        /// Model location.
        path: PathBuf,
        /// Failure description.
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The output format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during image processing (encode, decode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Classify this error for structured reporting.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ModelNotFound { .. }
            | Self::ModelLoad { .. }
            | Self::FaceModel { .. }
            | Self::InvalidParameter { .. } => ErrorCategory::Resource,
            Self::ImageLoad { .. } | Self::MaskLoad { .. } | Self::Image(_) => {
                ErrorCategory::Input
            }
            Self::ImageSave { .. } | Self::UnsupportedFormat(_) | Self::Io(_) => {
                ErrorCategory::Output
            }
            Self::Inference(_) | Self::ShapeMismatch { .. } => ErrorCategory::Integration,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
