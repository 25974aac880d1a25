//! Raster buffer types shared by every pipeline stage.
//!
//! Three buffer types with distinct value ranges:
//!
//! - [`Raster`]: the source image, 1, 3 or 4 channels of 8-bit samples.
//! - [`ConfidenceMap`]: graded detector output, any value in `0..=255`.
//! - [`Mask`]: a decision, every value is exactly `0` or `255`.
//!
//! A confidence map only becomes a mask through [`ConfidenceMap::threshold`],
//! so graded values can never leak into compositing.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, RgbImage, RgbaImage};
use imageproc::distance_transform::Norm;

use crate::error::{Error, Result};

/// Value of an active mask pixel.
pub const MASK_ON: u8 = 255;

/// Guard added to divisors that may be zero.
pub(crate) const EPSILON: f32 = 1e-6;

/// A decoded source image.
///
/// Immutable once loaded; only the compositor produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raster {
    /// Single-channel grayscale.
    Gray(GrayImage),
    /// Three-channel color.
    Rgb(RgbImage),
    /// Color plus alpha.
    Rgba(RgbaImage),
}

impl Raster {
    /// Normalize any decoded image to one of the three supported layouts.
    ///
    /// 8-bit gray, RGB and RGBA are kept as-is. Other formats go to the
    /// nearest 8-bit layout: anything with alpha becomes RGBA, remaining
    /// single-channel formats become gray, everything else RGB.
    #[must_use]
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Self::Gray(gray),
            DynamicImage::ImageRgb8(rgb) => Self::Rgb(rgb),
            DynamicImage::ImageRgba8(rgba) => Self::Rgba(rgba),
            other if other.color().has_alpha() => Self::Rgba(other.to_rgba8()),
            other if !other.color().has_color() => Self::Gray(other.to_luma8()),
            other => Self::Rgb(other.to_rgb8()),
        }
    }

    /// Load and decode an image file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageLoad`] with the failing path if the file cannot
    /// be read or decoded.
    pub fn open(path: &Path) -> Result<Self> {
        let decoded = image::open(path).map_err(|source| Error::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_dynamic(decoded))
    }

    /// Width and height in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Gray(img) => img.dimensions(),
            Self::Rgb(img) => img.dimensions(),
            Self::Rgba(img) => img.dimensions(),
        }
    }

    /// Number of channels per pixel (1, 3 or 4).
    #[must_use]
    pub fn channels(&self) -> u8 {
        match self {
            Self::Gray(_) => 1,
            Self::Rgb(_) => 3,
            Self::Rgba(_) => 4,
        }
    }

    /// Raw interleaved sample bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Gray(img) => img.as_raw(),
            Self::Rgb(img) => img.as_raw(),
            Self::Rgba(img) => img.as_raw(),
        }
    }

    /// Grayscale projection used by every detector.
    ///
    /// Uses the luminance formula `0.299*R + 0.587*G + 0.114*B`; alpha is
    /// ignored.
    #[must_use]
    pub fn to_gray(&self) -> GrayImage {
        match self {
            Self::Gray(img) => img.clone(),
            Self::Rgb(img) => GrayImage::from_fn(img.width(), img.height(), |x, y| {
                let p = img.get_pixel(x, y);
                Luma([luminance(p[0], p[1], p[2])])
            }),
            Self::Rgba(img) => GrayImage::from_fn(img.width(), img.height(), |x, y| {
                let p = img.get_pixel(x, y);
                Luma([luminance(p[0], p[1], p[2])])
            }),
        }
    }

    /// Three-channel color projection fed to the inpainting model.
    ///
    /// Gray samples are replicated, alpha is dropped.
    #[must_use]
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Self::Gray(img) => DynamicImage::ImageLuma8(img.clone()).to_rgb8(),
            Self::Rgb(img) => img.clone(),
            Self::Rgba(img) => DynamicImage::ImageRgba8(img.clone()).to_rgb8(),
        }
    }

    /// Convert into a [`DynamicImage`] for encoding.
    #[must_use]
    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Self::Gray(img) => DynamicImage::ImageLuma8(img),
            Self::Rgb(img) => DynamicImage::ImageRgb8(img),
            Self::Rgba(img) => DynamicImage::ImageRgba8(img),
        }
    }
}

/// BT.601 luminance of one color pixel, rounded to the nearest sample.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let lum = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
    lum.round().clamp(0.0, 255.0) as u8
}

/// Graded, pre-threshold detector output in `0..=255`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfidenceMap(GrayImage);

impl ConfidenceMap {
    /// An all-zero map: the detector found nothing.
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    /// Wrap an 8-bit image whose values are already on the `0..=255` scale.
    #[must_use]
    pub fn from_gray(image: GrayImage) -> Self {
        Self(image)
    }

    /// Rescale a non-negative float field so its maximum maps to 255.
    ///
    /// Values are truncated, not rounded. A field whose maximum is zero
    /// yields an empty map.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_normalized(values: &[f32], width: u32, height: u32) -> Self {
        debug_assert_eq!(values.len(), (width as usize) * (height as usize));
        let max = values.iter().copied().fold(0.0_f32, f32::max);
        if max <= 0.0 {
            return Self::empty(width, height);
        }
        let scale = 255.0 / (max + EPSILON);
        let data = values
            .iter()
            .map(|&v| (v * scale).clamp(0.0, 255.0) as u8)
            .collect();
        GrayImage::from_raw(width, height, data).map_or_else(|| Self::empty(width, height), Self)
    }

    /// Binary decision: values strictly above `level` become active.
    #[must_use]
    pub fn threshold(&self, level: u8) -> Mask {
        Mask::from_gray_threshold(&self.0, level)
    }

    /// Underlying 8-bit image.
    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }
}

/// A binary per-pixel selector: `0` keeps the original, `255` allows replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(GrayImage);

impl Mask {
    /// A mask selecting nothing.
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    /// Threshold an arbitrary 8-bit image: values strictly above `level` become active.
    #[must_use]
    pub fn from_gray_threshold(image: &GrayImage, level: u8) -> Self {
        let mut out = image.clone();
        for p in out.pixels_mut() {
            p[0] = if p[0] > level { MASK_ON } else { 0 };
        }
        Self(out)
    }

    /// Treat every non-zero sample as active.
    #[must_use]
    pub fn from_nonzero(image: &GrayImage) -> Self {
        Self::from_gray_threshold(image, 0)
    }

    /// Load a mask file, thresholding its grayscale projection at `level`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaskLoad`] if the file cannot be read or decoded.
    pub fn open(path: &Path, level: u8) -> Result<Self> {
        let decoded = image::open(path).map_err(|source| Error::MaskLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let gray = Raster::from_dynamic(decoded).to_gray();
        Ok(Self::from_gray_threshold(&gray, level))
    }

    /// Width and height in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    /// Whether the pixel at `(x, y)` is active.
    #[must_use]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y)[0] == MASK_ON
    }

    /// Activate the pixel at `(x, y)`.
    pub fn set(&mut self, x: u32, y: u32) {
        self.0.put_pixel(x, y, Luma([MASK_ON]));
    }

    /// Number of active pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        self.0.as_raw().iter().filter(|&&v| v == MASK_ON).count() as u64
    }

    /// Whether no pixel is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.as_raw().iter().all(|&v| v == 0)
    }

    /// Pixels active in both masks.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.combine(other, |a, b| a && b)
    }

    /// Pixels active in either mask.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.combine(other, |a, b| a || b)
    }

    /// Pixels active here but not in `other`.
    #[must_use]
    pub fn and_not(&self, other: &Self) -> Self {
        self.combine(other, |a, b| a && !b)
    }

    fn combine(&self, other: &Self, op: impl Fn(bool, bool) -> bool) -> Self {
        debug_assert_eq!(self.dimensions(), other.dimensions());
        let mut out = self.0.clone();
        for (dst, &b) in out.iter_mut().zip(other.0.as_raw()) {
            *dst = if op(*dst == MASK_ON, b == MASK_ON) {
                MASK_ON
            } else {
                0
            };
        }
        Self(out)
    }

    /// Square dilation with a `(2 * radius + 1)`-wide kernel.
    ///
    /// Never removes an active pixel.
    #[must_use]
    pub fn dilate(&self, radius: u8) -> Self {
        if radius == 0 {
            return self.clone();
        }
        Self(imageproc::morphology::dilate(&self.0, Norm::LInf, radius))
    }

    /// Nearest-neighbour resample, preserving binary values.
    #[must_use]
    pub fn resize_nearest(&self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Self(image::imageops::resize(
            &self.0,
            width,
            height,
            FilterType::Nearest,
        ))
    }

    /// Underlying 8-bit image.
    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    /// Consume the mask, returning the underlying image.
    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.0
    }
}
