//! Float-domain numeric primitives.
//!
//! `imageproc` filters operate on 8-bit images and clamp every intermediate
//! result. The detectors need local statistics of squared intensities and the
//! refiner smooths a `[0, 1]` mask, so those run here on `f32` buffers.
//! Borders are reflected without repeating the edge sample (`dcb|abcd|cba`).

use image::imageops::FilterType;
use image::RgbImage;

/// Map a possibly out-of-range index into `0..len` by reflection.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub(crate) fn reflect(mut i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let n = len as isize;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * (n - 1) - i;
        }
    }
    i as usize
}

/// Running-sum mean of one line with a `2 * radius + 1` window.
fn mean_line(src: &[f64], dst: &mut [f64], radius: usize) {
    let len = src.len();
    #[allow(clippy::cast_possible_wrap)]
    let r = radius as isize;
    #[allow(clippy::cast_precision_loss)]
    let norm = (2 * radius + 1) as f64;

    let mut sum: f64 = (-r..=r).map(|i| src[reflect(i, len)]).sum();
    for (x, out) in dst.iter_mut().enumerate() {
        *out = sum / norm;
        #[allow(clippy::cast_possible_wrap)]
        let xi = x as isize;
        sum += src[reflect(xi + r + 1, len)] - src[reflect(xi - r, len)];
    }
}

/// Mean over a `window_w x window_h` box centred on every sample.
///
/// Window sizes should be odd; even sizes are widened by one.
/// Accumulates in `f64` so the variance identity `E[x^2] - E[x]^2` stays
/// exact for integer inputs.
#[must_use]
pub fn box_mean(
    values: &[f32],
    width: usize,
    height: usize,
    window_w: usize,
    window_h: usize,
) -> Vec<f32> {
    debug_assert_eq!(values.len(), width * height);
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let (rx, ry) = (window_w / 2, window_h / 2);

    let mut horizontal = vec![0.0_f64; width * height];
    let mut line = vec![0.0_f64; width];
    for y in 0..height {
        let row: Vec<f64> = values[y * width..(y + 1) * width]
            .iter()
            .map(|&v| f64::from(v))
            .collect();
        mean_line(&row, &mut line, rx);
        horizontal[y * width..(y + 1) * width].copy_from_slice(&line);
    }

    let mut out = vec![0.0_f32; width * height];
    let mut column = vec![0.0_f64; height];
    let mut result = vec![0.0_f64; height];
    for x in 0..width {
        for y in 0..height {
            column[y] = horizontal[y * width + x];
        }
        mean_line(&column, &mut result, ry);
        for y in 0..height {
            #[allow(clippy::cast_possible_truncation)]
            {
                out[y * width + x] = result[y] as f32;
            }
        }
    }
    out
}

/// Edge-preserving bilateral filter over a float field.
///
/// `diameter` is the width of the circular neighbourhood; `sigma_color` is in
/// the units of the input values, `sigma_space` in pixels.
#[must_use]
pub fn bilateral(
    values: &[f32],
    width: usize,
    height: usize,
    diameter: usize,
    sigma_color: f32,
    sigma_space: f32,
) -> Vec<f32> {
    debug_assert_eq!(values.len(), width * height);
    #[allow(clippy::cast_possible_wrap)]
    let radius = (diameter / 2).max(1) as isize;
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);

    let mut taps = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = dx * dx + dy * dy;
            if d2 <= radius * radius {
                #[allow(clippy::cast_precision_loss)]
                taps.push((dx, dy, (d2 as f32 * space_coeff).exp()));
            }
        }
    }

    let mut out = vec![0.0_f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let center = values[y * width + x];
            let mut acc = 0.0_f32;
            let mut weight_sum = 0.0_f32;
            for &(dx, dy, space_weight) in &taps {
                #[allow(clippy::cast_possible_wrap)]
                let sx = reflect(x as isize + dx, width);
                #[allow(clippy::cast_possible_wrap)]
                let sy = reflect(y as isize + dy, height);
                let v = values[sy * width + sx];
                let diff = v - center;
                let w = space_weight * (diff * diff * color_coeff).exp();
                acc += w * v;
                weight_sum += w;
            }
            out[y * width + x] = acc / weight_sum;
        }
    }
    out
}

/// Per-axis contribution table for area resampling.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn area_weights(src: u32, dst: u32) -> Vec<Vec<(usize, f32)>> {
    let scale = f64::from(src) / f64::from(dst);
    (0..dst)
        .map(|d| {
            let start = f64::from(d) * scale;
            let end = (f64::from(d) + 1.0) * scale;
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src as usize);
            (first..last)
                .filter_map(|s| {
                    let s_f = s as f64;
                    let overlap = end.min(s_f + 1.0) - start.max(s_f);
                    (overlap > 1e-9).then(|| (s, (overlap / scale) as f32))
                })
                .collect()
        })
        .collect()
}

/// Resample by pixel-area averaging.
///
/// Every destination pixel is the overlap-weighted mean of the source pixels
/// it covers, which avoids aliasing when shrinking. Pure enlargements fall
/// back to bilinear interpolation.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resize_area(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = image.dimensions();
    if (src_w, src_h) == (width, height) {
        return image.clone();
    }
    if width >= src_w && height >= src_h {
        return image::imageops::resize(image, width, height, FilterType::Triangle);
    }

    let wx = area_weights(src_w, width);
    let wy = area_weights(src_h, height);

    let mut horizontal = vec![[0.0_f32; 3]; (width as usize) * (src_h as usize)];
    for y in 0..src_h {
        for (dx, taps) in wx.iter().enumerate() {
            let mut acc = [0.0_f32; 3];
            for &(sx, w) in taps {
                let p = image.get_pixel(sx as u32, y);
                for c in 0..3 {
                    acc[c] += w * f32::from(p[c]);
                }
            }
            horizontal[(y as usize) * (width as usize) + dx] = acc;
        }
    }

    RgbImage::from_fn(width, height, |x, y| {
        let mut acc = [0.0_f32; 3];
        for &(sy, w) in &wy[y as usize] {
            let src = horizontal[sy * (width as usize) + x as usize];
            for c in 0..3 {
                acc[c] += w * src[c];
            }
        }
        image::Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
    })
}
