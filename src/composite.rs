//! Surgical compositing.
//!
//! The model output is sharpened to recover detail lost in resampling, then
//! copied into the source image at active mask pixels only. Every other
//! byte of the result, alpha included, is the source byte.

use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::gaussian_blur_f32;

use crate::error::{Error, Result};
use crate::raster::{luminance, Mask, Raster};

/// Unsharp-mask and replacement settings.
#[derive(Debug, Clone)]
pub struct Compositor {
    /// Gaussian sigma of the unsharp mask.
    pub sharpen_sigma: f32,
    /// Weight of the source in `amount * src - (amount - 1) * blur`.
    pub sharpen_amount: f32,
    /// Mask values strictly above this are replaced.
    pub mask_level: u8,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            sharpen_sigma: 3.0,
            sharpen_amount: 1.6,
            mask_level: 10,
        }
    }
}

impl Compositor {
    /// Sharpen `replacement` and composite it into `original`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `replacement` and `original`
    /// differ in size.
    pub fn apply(
        &self,
        original: &Raster,
        replacement: &RgbImage,
        mask: &Mask,
    ) -> Result<Raster> {
        let sharpened = self.sharpen(replacement);
        self.composite(original, &sharpened, mask)
    }

    /// Unsharp mask: `amount * src - (amount - 1) * gaussian(src)`, per channel.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sharpen(&self, image: &RgbImage) -> RgbImage {
        if self.sharpen_sigma <= 0.0 {
            return image.clone();
        }
        let (w, h) = image.dimensions();
        let blurred: Vec<GrayImage> = (0..3)
            .map(|c| {
                let channel = GrayImage::from_fn(w, h, |x, y| Luma([image.get_pixel(x, y)[c]]));
                gaussian_blur_f32(&channel, self.sharpen_sigma)
            })
            .collect();

        let amount = self.sharpen_amount;
        let mut out = image.clone();
        for (x, y, p) in out.enumerate_pixels_mut() {
            for c in 0..3 {
                let src = f32::from(p[c]);
                let blur = f32::from(blurred[c].get_pixel(x, y)[0]);
                p[c] = (amount * src - (amount - 1.0) * blur).round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }

    /// Replace active mask pixels of `original` with `replacement`.
    ///
    /// The mask is resized to the image with nearest-neighbour sampling when
    /// needed. Gray sources receive the luminance of the replacement; alpha is
    /// never modified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `replacement` and `original`
    /// differ in size.
    pub fn composite(
        &self,
        original: &Raster,
        replacement: &RgbImage,
        mask: &Mask,
    ) -> Result<Raster> {
        let (w, h) = original.dimensions();
        if replacement.dimensions() != (w, h) {
            return Err(Error::ShapeMismatch {
                expected: format!("{w}x{h}"),
                actual: format!("{}x{}", replacement.width(), replacement.height()),
            });
        }
        let mask = mask.resize_nearest(w, h);
        let active = |x: u32, y: u32| mask.as_image().get_pixel(x, y)[0] > self.mask_level;

        let mut out = original.clone();
        match &mut out {
            Raster::Gray(img) => {
                for (x, y, p) in img.enumerate_pixels_mut() {
                    if active(x, y) {
                        let r = replacement.get_pixel(x, y);
                        p[0] = luminance(r[0], r[1], r[2]);
                    }
                }
            }
            Raster::Rgb(img) => {
                for (x, y, p) in img.enumerate_pixels_mut() {
                    if active(x, y) {
                        *p = *replacement.get_pixel(x, y);
                    }
                }
            }
            Raster::Rgba(img) => {
                for (x, y, p) in img.enumerate_pixels_mut() {
                    if active(x, y) {
                        let r = replacement.get_pixel(x, y);
                        p[0] = r[0];
                        p[1] = r[1];
                        p[2] = r[2];
                    }
                }
            }
        }
        Ok(out)
    }
}
