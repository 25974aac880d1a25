//! Spectral-residual saliency.
//!
//! The log-amplitude spectrum of natural images is smooth; whatever deviates
//! from its local average (the spectral residual) corresponds to the
//! visually distinctive parts of the image. Transforming the residual back
//! with the original phase gives a saliency map that is high on isolated,
//! high-contrast structure and low on flat or uniformly textured areas.

use std::f64::consts::PI;

use image::imageops::{resize, FilterType};
use image::{GrayImage, Luma};

use crate::filter::reflect;
use crate::raster::{ConfidenceMap, Mask};

/// Complex sample as `(re, im)`.
type Complex = (f64, f64);

/// Amplitudes are floored at this fraction of the spectrum peak before the
/// logarithm, so exact spectral zeros do not dominate the residual.
const AMPLITUDE_FLOOR: f64 = 1e-3;

/// Spectral-residual saliency estimator.
#[derive(Debug, Clone)]
pub struct SpectralResidualSaliency {
    /// Side of the square working resolution.
    pub working_size: u32,
    /// Standard deviation of the final smoothing kernel.
    pub smoothing_sigma: f64,
    /// Saliency strictly above this counts as salient.
    pub threshold: u8,
}

impl Default for SpectralResidualSaliency {
    fn default() -> Self {
        Self {
            working_size: 64,
            smoothing_sigma: 8.0,
            threshold: 80,
        }
    }
}

impl SpectralResidualSaliency {
    /// Saliency of every pixel, min-max normalized to `0..=255`.
    ///
    /// An image without any spectral structure yields an all-zero map.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn saliency_map(&self, gray: &GrayImage) -> ConfidenceMap {
        let (w, h) = gray.dimensions();
        let n = self.working_size as usize;
        if w == 0 || h == 0 || n == 0 {
            return ConfidenceMap::empty(w, h);
        }

        let small = resize(gray, self.working_size, self.working_size, FilterType::Triangle);
        let first = small.as_raw()[0];
        if small.iter().all(|&v| v == first) {
            return ConfidenceMap::empty(w, h);
        }
        let spatial: Vec<Complex> = small.iter().map(|&v| (f64::from(v), 0.0)).collect();
        let spectrum = dft2(&spatial, n, false);

        let amplitude: Vec<f64> = spectrum.iter().map(|&(re, im)| re.hypot(im)).collect();
        let floor = amplitude.iter().copied().fold(0.0, f64::max) * AMPLITUDE_FLOOR;
        let log_amplitude: Vec<f64> = amplitude.iter().map(|&a| a.max(floor).ln()).collect();
        let average = box3(&log_amplitude, n);

        let residual: Vec<Complex> = spectrum
            .iter()
            .zip(log_amplitude.iter().zip(&average))
            .map(|(&(re, im), (&la, &avg))| {
                let phase = im.atan2(re);
                let amplitude = (la - avg).exp();
                (amplitude * phase.cos(), amplitude * phase.sin())
            })
            .collect();
        let back = dft2(&residual, n, true);
        let energy: Vec<f64> = back.iter().map(|&(re, im)| re * re + im * im).collect();
        let smooth = gaussian5(&energy, n, self.smoothing_sigma);

        let lo = smooth.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = smooth.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(hi - lo).is_finite() || hi - lo <= f64::from(crate::raster::EPSILON) {
            return ConfidenceMap::empty(w, h);
        }

        let quantized = GrayImage::from_fn(self.working_size, self.working_size, |x, y| {
            let v = (smooth[y as usize * n + x as usize] - lo) / (hi - lo);
            Luma([(v * 255.0).clamp(0.0, 255.0) as u8])
        });
        ConfidenceMap::from_gray(resize(&quantized, w, h, FilterType::Triangle))
    }

    /// Binary saliency gate.
    #[must_use]
    pub fn gate(&self, gray: &GrayImage) -> Mask {
        self.saliency_map(gray).threshold(self.threshold)
    }
}

/// Separable 2-D discrete Fourier transform of an `n x n` grid.
///
/// The inverse is scaled by `1 / n^2`.
#[allow(clippy::cast_precision_loss)]
fn dft2(data: &[Complex], n: usize, inverse: bool) -> Vec<Complex> {
    let sign = if inverse { 1.0 } else { -1.0 };
    let twiddles: Vec<Complex> = (0..n)
        .map(|k| {
            let angle = sign * 2.0 * PI * k as f64 / n as f64;
            (angle.cos(), angle.sin())
        })
        .collect();

    let transform = |line: &[Complex], out: &mut [Complex]| {
        for (k, slot) in out.iter_mut().enumerate() {
            let mut acc = (0.0, 0.0);
            for (j, &(re, im)) in line.iter().enumerate() {
                let (tr, ti) = twiddles[(k * j) % n];
                acc.0 += re * tr - im * ti;
                acc.1 += re * ti + im * tr;
            }
            *slot = acc;
        }
    };

    let mut rows = vec![(0.0, 0.0); n * n];
    for (src, dst) in data.chunks_exact(n).zip(rows.chunks_exact_mut(n)) {
        transform(src, dst);
    }

    let mut out = vec![(0.0, 0.0); n * n];
    let mut column = vec![(0.0, 0.0); n];
    let mut result = vec![(0.0, 0.0); n];
    for x in 0..n {
        for y in 0..n {
            column[y] = rows[y * n + x];
        }
        transform(&column, &mut result);
        for y in 0..n {
            out[y * n + x] = result[y];
        }
    }

    if inverse {
        let scale = 1.0 / (n * n) as f64;
        for v in &mut out {
            v.0 *= scale;
            v.1 *= scale;
        }
    }
    out
}

/// 3x3 mean with reflected borders.
#[allow(clippy::cast_possible_wrap)]
fn box3(values: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    for y in 0..n {
        for x in 0..n {
            let mut sum = 0.0;
            for dy in -1..=1_isize {
                for dx in -1..=1_isize {
                    let sy = reflect(y as isize + dy, n);
                    let sx = reflect(x as isize + dx, n);
                    sum += values[sy * n + sx];
                }
            }
            out[y * n + x] = sum / 9.0;
        }
    }
    out
}

/// 5x5 Gaussian blur with reflected borders.
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
fn gaussian5(values: &[f64], n: usize, sigma: f64) -> Vec<f64> {
    let weights: Vec<f64> = (-2..=2_i32)
        .map(|i| (-f64::from(i * i) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    let kernel: Vec<f64> = weights.iter().map(|w| w / total).collect();

    let mut horizontal = vec![0.0; n * n];
    for y in 0..n {
        for x in 0..n {
            horizontal[y * n + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * values[y * n + reflect(x as isize + k as isize - 2, n)])
                .sum();
        }
    }
    let mut out = vec![0.0; n * n];
    for y in 0..n {
        for x in 0..n {
            out[y * n + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * horizontal[reflect(y as isize + k as isize - 2, n) * n + x])
                .sum();
        }
    }
    out
}
