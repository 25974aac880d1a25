//! Mask refinement.
//!
//! Turns the fused candidate into the mask handed to the inpainter:
//! close small gaps inside a mark, snap the boundary with a bilateral pass,
//! drop specks, then add a safety margin.

use image::{GrayImage, Luma};
use imageproc::morphology::{grayscale_close, Mask as Kernel};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::filter::bilateral;
use crate::raster::{Mask, MASK_ON};

/// Mask refiner parameters.
#[derive(Debug, Clone)]
pub struct MaskRefiner {
    /// Long side of the closing rectangles.
    pub close_long: u32,
    /// Short side of the closing rectangles.
    pub close_short: u32,
    /// Bilateral neighbourhood diameter.
    pub bilateral_diameter: usize,
    /// Bilateral range sigma, on the `[0, 1]` mask scale.
    pub sigma_color: f32,
    /// Bilateral spatial sigma, in pixels.
    pub sigma_space: f32,
    /// Smoothed values strictly above this (on `0..=255`) stay active.
    pub snap_level: u8,
    /// Components smaller than this many pixels are dropped.
    pub min_area: u32,
    /// Radius of the final square dilation.
    pub dilation_radius: u8,
}

impl Default for MaskRefiner {
    fn default() -> Self {
        Self {
            close_long: 20,
            close_short: 4,
            bilateral_diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
            snap_level: 127,
            min_area: 50,
            dilation_radius: 2,
        }
    }
}

/// Output of each refinement step, in order.
#[derive(Debug, Clone)]
pub struct Refinement {
    /// After horizontal then vertical closing.
    pub closed: Mask,
    /// After bilateral edge snapping.
    pub snapped: Mask,
    /// After the connected-component area filter.
    pub filtered: Mask,
    /// After the final dilation.
    pub dilated: Mask,
}

impl MaskRefiner {
    /// Refine a candidate mask.
    #[must_use]
    pub fn refine(&self, candidate: &Mask) -> Mask {
        self.refine_stages(candidate).dilated
    }

    /// Refine a candidate mask, keeping every intermediate.
    #[must_use]
    pub fn refine_stages(&self, candidate: &Mask) -> Refinement {
        let closed = self.close(candidate);
        let snapped = self.snap(&closed);
        let filtered = self.drop_small(&snapped);
        let dilated = filtered.dilate(self.dilation_radius);
        Refinement {
            closed,
            snapped,
            filtered,
            dilated,
        }
    }

    /// Closing with a `close_long x close_short` rectangle, then its transpose.
    #[must_use]
    pub fn close(&self, mask: &Mask) -> Mask {
        if mask.is_empty() {
            return mask.clone();
        }
        let horizontal = rect_kernel(self.close_long, self.close_short);
        let vertical = rect_kernel(self.close_short, self.close_long);
        let once = grayscale_close(mask.as_image(), &horizontal);
        Mask::from_nonzero(&grayscale_close(&once, &vertical))
    }

    /// Bilateral smoothing of the `[0, 1]` mask, re-thresholded.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn snap(&self, mask: &Mask) -> Mask {
        if mask.is_empty() {
            return mask.clone();
        }
        let (w, h) = mask.dimensions();
        let values: Vec<f32> = mask
            .as_image()
            .iter()
            .map(|&v| f32::from(v) / 255.0)
            .collect();
        let smoothed = bilateral(
            &values,
            w as usize,
            h as usize,
            self.bilateral_diameter,
            self.sigma_color,
            self.sigma_space,
        );
        let data = smoothed
            .iter()
            .map(|&v| (v * 255.0).clamp(0.0, 255.0) as u8)
            .collect();
        GrayImage::from_raw(w, h, data)
            .map_or_else(|| Mask::empty(w, h), |img| Mask::from_gray_threshold(&img, self.snap_level))
    }

    /// Remove 8-connected components with fewer than `min_area` pixels.
    #[must_use]
    pub fn drop_small(&self, mask: &Mask) -> Mask {
        if mask.is_empty() {
            return mask.clone();
        }
        let labels = connected_components(mask.as_image(), Connectivity::Eight, Luma([0_u8]));
        let count = labels.iter().copied().max().unwrap_or(0) as usize;
        let mut areas = vec![0_u32; count + 1];
        for &label in labels.iter() {
            areas[label as usize] += 1;
        }

        let (w, h) = mask.dimensions();
        let out = GrayImage::from_fn(w, h, |x, y| {
            let label = labels.get_pixel(x, y)[0] as usize;
            if label != 0 && areas[label] >= self.min_area {
                Luma([MASK_ON])
            } else {
                Luma([0])
            }
        });
        Mask::from_nonzero(&out)
    }
}

/// Rectangular structuring element centred like OpenCV's anchor default.
#[allow(clippy::cast_possible_truncation)]
fn rect_kernel(width: u32, height: u32) -> Kernel {
    let (width, height) = (width.clamp(1, 255), height.clamp(1, 255));
    let image = GrayImage::from_pixel(width, height, Luma([MASK_ON]));
    Kernel::from_image(&image, (width / 2) as u8, (height / 2) as u8)
}
