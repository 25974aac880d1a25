//! Neural inpainting wrapper.
//!
//! The model sees a fixed square resolution. The image is area-resampled
//! down to it, the mask nearest-resampled, both normalized to `[0, 1]` in
//! NCHW layout. The prediction is checked, rescaled to bytes and resampled
//! back to the source size with Lanczos.

use std::sync::Arc;

use image::imageops::{resize, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayD, Ix4};
use tracing::debug;

use crate::error::{Error, Result};
use crate::filter::resize_area;
use crate::raster::{Mask, Raster};

/// Model outputs whose maximum is at most this are taken to be in `[0, 1]`.
const UNIT_RANGE_LIMIT: f32 = 1.2;

/// Something that can fill masked pixels of a square image.
///
/// The production backend is [`OnnxInpaintModel`](crate::model::OnnxInpaintModel);
/// tests substitute their own.
pub trait InpaintBackend: Send + Sync {
    /// Side of the square input the backend expects.
    fn resolution(&self) -> u32;

    /// Run the model.
    ///
    /// `image` is `[1, 3, S, S]` and `mask` is `[1, 1, S, S]`, both in
    /// `[0, 1]`. The result should be `[1, 3, S, S]`, either in `[0, 1]` or in
    /// `[0, 255]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded or fails to run.
    fn infer(&self, image: Array4<f32>, mask: Array4<f32>) -> Result<ArrayD<f32>>;
}

/// Fills the masked region of an image using an [`InpaintBackend`].
#[derive(Clone)]
pub struct NeuralInpainter {
    backend: Arc<dyn InpaintBackend>,
}

impl std::fmt::Debug for NeuralInpainter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuralInpainter")
            .field("resolution", &self.backend.resolution())
            .finish_non_exhaustive()
    }
}

impl NeuralInpainter {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn InpaintBackend>) -> Self {
        Self { backend }
    }

    /// Model input resolution.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.backend.resolution()
    }

    /// Predict the whole image with the masked region filled in.
    ///
    /// The result has the source dimensions and three channels. Only the
    /// masked region of it is meant to be used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an empty image or a zero
    /// backend resolution, [`Error::ShapeMismatch`] if the model output is
    /// not `[1, 3, S, S]`, and any backend error unchanged.
    pub fn inpaint(&self, image: &Raster, mask: &Mask) -> Result<RgbImage> {
        let size = self.backend.resolution();
        if size == 0 {
            return Err(Error::InvalidParameter {
                name: "resolution",
                reason: "must be positive".to_string(),
            });
        }
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(Error::InvalidParameter {
                name: "image",
                reason: "image has no pixels".to_string(),
            });
        }

        let (image_tensor, mask_tensor) = preprocess(image, mask, size);
        debug!(size, width = w, height = h, "running inpainting model");
        let output = self.backend.infer(image_tensor, mask_tensor)?;
        let prediction = postprocess(&output, size)?;
        Ok(resize(&prediction, w, h, FilterType::Lanczos3))
    }
}

/// Build the `[1, 3, S, S]` image and `[1, 1, S, S]` mask tensors.
fn preprocess(image: &Raster, mask: &Mask, size: u32) -> (Array4<f32>, Array4<f32>) {
    let s = size as usize;
    let rgb = resize_area(&image.to_rgb(), size, size);
    let small_mask = mask.resize_nearest(size, size);

    let image_tensor = Array4::from_shape_fn((1, 3, s, s), |(_, c, y, x)| {
        #[allow(clippy::cast_possible_truncation)]
        let p = rgb.get_pixel(x as u32, y as u32);
        f32::from(p[c]) / 255.0
    });
    let mask_tensor = Array4::from_shape_fn((1, 1, s, s), |(_, _, y, x)| {
        #[allow(clippy::cast_possible_truncation)]
        let v = small_mask.as_image().get_pixel(x as u32, y as u32)[0];
        f32::from(v) / 255.0
    });
    (image_tensor, mask_tensor)
}

/// Validate the model output and convert it to an image.
///
/// Values are rescaled from `[0, 1]` when the maximum is at most
/// [`UNIT_RANGE_LIMIT`], then clipped and truncated to bytes.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn postprocess(output: &ArrayD<f32>, size: u32) -> Result<RgbImage> {
    let s = size as usize;
    if output.shape() != [1, 3, s, s] {
        return Err(Error::ShapeMismatch {
            expected: format!("[1, 3, {s}, {s}]"),
            actual: format!("{:?}", output.shape()),
        });
    }

    let output = output
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|e| Error::ShapeMismatch {
            expected: format!("[1, 3, {s}, {s}]"),
            actual: e.to_string(),
        })?;

    let max = output.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let scale = if max <= UNIT_RANGE_LIMIT { 255.0 } else { 1.0 };

    Ok(RgbImage::from_fn(size, size, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let channel = |c: usize| (output[[0, c, y, x]] * scale).clamp(0.0, 255.0) as u8;
        Rgb([channel(0), channel(1), channel(2)])
    }))
}
