//! Repeating diagonal line grids.
//!
//! Stock-photo style watermarks tile a mark along parallel diagonals. Lines
//! are found with a Hough transform over Canny edges, split into segments
//! by walking the edge map, and restricted to diagonal orientations. When
//! enough diagonal segments exist, only those near the most common angle
//! are kept, which rejects incidental diagonal edges in the scene.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use imageproc::edges::canny;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use imageproc::point::Point;

use super::{fill_polygon, Detector, PERIODIC};
use crate::raster::{ConfidenceMap, MASK_ON};

/// Diagonal orientation bands, in degrees, exclusive on both ends.
const DIAGONAL_BANDS: [(f32, f32); 2] = [(25.0, 65.0), (115.0, 155.0)];

/// Slack applied to Hough angles before the exact segment check.
const HOUGH_ANGLE_SLACK: f32 = 5.0;

/// A straight edge segment in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    /// First endpoint.
    pub start: Point<f32>,
    /// Second endpoint.
    pub end: Point<f32>,
}

impl LineSegment {
    /// Orientation in degrees, in `[0, 180)`.
    #[must_use]
    pub fn angle(&self) -> f32 {
        (self.end.y - self.start.y)
            .atan2(self.end.x - self.start.x)
            .to_degrees()
            .rem_euclid(180.0)
    }

    /// Euclidean length in pixels.
    #[must_use]
    pub fn length(&self) -> f32 {
        (self.end.x - self.start.x).hypot(self.end.y - self.start.y)
    }

    fn is_diagonal(&self) -> bool {
        in_diagonal_band(self.angle(), 0.0)
    }
}

/// Dominant-angle diagonal line detector.
#[derive(Debug, Clone)]
pub struct PeriodicDetector {
    /// Canny low hysteresis threshold.
    ///
    /// Gradients are measured after a Gaussian pre-blur (sigma 1.4) as L2
    /// Sobel magnitudes, which leaves a thin line with about a third of the
    /// response of an unblurred L1 Sobel. The defaults are scaled to match.
    pub canny_low: f32,
    /// Canny high hysteresis threshold.
    pub canny_high: f32,
    /// Minimum Hough accumulator votes for a line.
    pub vote_threshold: u32,
    /// Non-maximum suppression radius in Hough space.
    pub suppression_radius: u32,
    /// Shortest segment kept, in pixels.
    pub min_line_length: f32,
    /// Largest gap bridged inside one segment, in pixels.
    pub max_line_gap: f32,
    /// Angle clustering only happens with at least this many diagonals.
    pub min_lines: usize,
    /// Histogram bins used to find the dominant angle.
    pub bins: usize,
    /// Segments within this many degrees of the dominant angle are kept.
    pub angle_tolerance: f32,
    /// Stroke width used to paint kept segments.
    pub thickness: u32,
}

impl Default for PeriodicDetector {
    fn default() -> Self {
        Self {
            canny_low: 16.0,
            canny_high: 50.0,
            vote_threshold: 100,
            suppression_radius: 8,
            min_line_length: 150.0,
            max_line_gap: 20.0,
            min_lines: 6,
            bins: 18,
            angle_tolerance: 10.0,
            thickness: 12,
        }
    }
}

impl PeriodicDetector {
    /// Diagonal segments aligned with the dominant angle.
    ///
    /// Empty when fewer than [`min_lines`](Self::min_lines) diagonal
    /// segments are found.
    #[must_use]
    pub fn segments(&self, gray: &GrayImage) -> Vec<LineSegment> {
        let (w, h) = gray.dimensions();
        if w < 3 || h < 3 {
            return Vec::new();
        }
        let edges = canny(gray, self.canny_low, self.canny_high);
        let options = LineDetectionOptions {
            vote_threshold: self.vote_threshold,
            suppression_radius: self.suppression_radius,
        };

        let diagonals: Vec<LineSegment> = detect_lines(&edges, options)
            .iter()
            .filter(|line| in_diagonal_band(direction_of(line), HOUGH_ANGLE_SLACK))
            .flat_map(|line| self.walk(&edges, line))
            .filter(LineSegment::is_diagonal)
            .collect();

        if diagonals.len() < self.min_lines {
            return Vec::new();
        }
        let angles: Vec<f32> = diagonals.iter().map(LineSegment::angle).collect();
        let Some(dominant) = dominant_angle(&angles, self.bins) else {
            return Vec::new();
        };
        diagonals
            .into_iter()
            .filter(|s| (s.angle() - dominant).abs() < self.angle_tolerance)
            .collect()
    }

    /// Split a Hough line into edge-supported segments.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn walk(&self, edges: &GrayImage, line: &PolarLine) -> Vec<LineSegment> {
        let (w, h) = edges.dimensions();
        let theta = (line.angle_in_degrees as f32).to_radians();
        let (sin, cos) = theta.sin_cos();
        let origin = (line.r * cos, line.r * sin);
        let direction = (-sin, cos);
        let reach = (w as f32).hypot(h as f32).ceil() as i32;

        let hit = |t: f32| {
            let x = origin.0 + t * direction.0;
            let y = origin.1 + t * direction.1;
            [-1.0_f32, 0.0, 1.0].iter().any(|&n| {
                let px = (x + n * cos).round();
                let py = (y + n * sin).round();
                px >= 0.0
                    && py >= 0.0
                    && px < w as f32
                    && py < h as f32
                    && edges.get_pixel(px as u32, py as u32)[0] > 0
            })
        };
        let point_at = |t: f32| Point::new(origin.0 + t * direction.0, origin.1 + t * direction.1);

        let mut segments = Vec::new();
        let mut run: Option<(f32, f32)> = None;
        for step in -reach..=reach {
            let t = step as f32;
            if !hit(t) {
                continue;
            }
            run = match run {
                Some((start, last)) if t - last <= self.max_line_gap => Some((start, t)),
                Some((start, last)) => {
                    self.push_run(&mut segments, point_at(start), point_at(last));
                    Some((t, t))
                }
                None => Some((t, t)),
            };
        }
        if let Some((start, last)) = run {
            self.push_run(&mut segments, point_at(start), point_at(last));
        }
        segments
    }

    fn push_run(&self, segments: &mut Vec<LineSegment>, start: Point<f32>, end: Point<f32>) {
        let segment = LineSegment { start, end };
        if segment.length() >= self.min_line_length {
            segments.push(segment);
        }
    }

    /// Paint a segment with round caps.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn paint(&self, canvas: &mut GrayImage, segment: &LineSegment) {
        let on = Luma([MASK_ON]);
        let half = self.thickness as f32 / 2.0;
        let length = segment.length();
        if length <= f32::EPSILON {
            return;
        }
        let nx = -(segment.end.y - segment.start.y) / length * half;
        let ny = (segment.end.x - segment.start.x) / length * half;
        let corner = |p: Point<f32>, sign: f32| {
            Point::new((p.x + sign * nx).round() as i32, (p.y + sign * ny).round() as i32)
        };
        let polygon = [
            corner(segment.start, 1.0),
            corner(segment.end, 1.0),
            corner(segment.end, -1.0),
            corner(segment.start, -1.0),
        ];
        fill_polygon(canvas, &polygon);

        let radius = half.round() as i32;
        for cap in [segment.start, segment.end] {
            draw_filled_circle_mut(
                canvas,
                (cap.x.round() as i32, cap.y.round() as i32),
                radius,
                on,
            );
        }
    }
}

impl Detector for PeriodicDetector {
    fn name(&self) -> &'static str {
        PERIODIC
    }

    fn confidence(&self, gray: &GrayImage) -> ConfidenceMap {
        let (w, h) = gray.dimensions();
        let mut canvas = GrayImage::new(w, h);
        for segment in self.segments(gray) {
            self.paint(&mut canvas, &segment);
        }
        ConfidenceMap::from_gray(canvas)
    }
}

/// Orientation of a Hough line itself (perpendicular to its normal).
#[allow(clippy::cast_precision_loss)]
fn direction_of(line: &PolarLine) -> f32 {
    (line.angle_in_degrees as f32 + 90.0).rem_euclid(180.0)
}

fn in_diagonal_band(angle: f32, slack: f32) -> bool {
    DIAGONAL_BANDS
        .iter()
        .any(|&(lo, hi)| angle > lo - slack && angle < hi + slack)
}

/// Left edge of the fullest histogram bin over the angle range.
///
/// Bins span `[min, max]` evenly; a degenerate range is widened by half a
/// degree on each side. Ties go to the lowest bin.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn dominant_angle(angles: &[f32], bins: usize) -> Option<f32> {
    if angles.is_empty() || bins == 0 {
        return None;
    }
    let mut lo = angles.iter().copied().fold(f32::INFINITY, f32::min);
    let mut hi = angles.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if hi - lo <= f32::EPSILON {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f32;

    let mut counts = vec![0_usize; bins];
    for &a in angles {
        let idx = (((a - lo) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    Some(lo + best as f32 * width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal_grid(size: u32, spacing: u32, line: u8) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x + y) % spacing < 3 {
                Luma([line])
            } else {
                Luma([220])
            }
        })
    }

    #[test]
    fn segment_angle_is_folded() {
        let s = LineSegment {
            start: Point::new(10.0, 10.0),
            end: Point::new(0.0, 0.0),
        };
        assert!((s.angle() - 45.0).abs() < 1e-4);
        assert!((s.length() - 200_f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn dominant_angle_picks_fullest_bin() {
        let angles = [44.0, 45.0, 45.5, 46.0, 135.0, 134.0];
        let dom = dominant_angle(&angles, 18).unwrap_or_default();
        assert!((dom - 44.0).abs() < 1e-4);
    }

    #[test]
    fn dominant_angle_of_identical_angles() {
        let dom = dominant_angle(&[30.0; 7], 18).unwrap_or_default();
        // Range widens to [29.5, 30.5]; the value lands in bin 9.
        assert!((dom - 30.0).abs() < 1e-3);
    }

    #[test]
    fn diagonal_grid_is_detected() {
        let gray = diagonal_grid(400, 40, 30);
        let detector = PeriodicDetector::default();
        let segments = detector.segments(&gray);
        assert!(segments.len() >= detector.min_lines);
        assert!(segments.iter().all(|s| (s.angle() - 135.0).abs() < 15.0));

        let mask = detector.detect(&gray);
        assert!(mask.is_set(200, 201));
    }

    #[test]
    fn faint_diagonal_grid_is_detected() {
        let gray = diagonal_grid(400, 40, 180);
        let detector = PeriodicDetector::default();
        assert!(detector.segments(&gray).len() >= detector.min_lines);
        assert!(detector.detect(&gray).is_set(200, 201));
    }

    #[test]
    fn zero_thickness_paints_a_hairline() {
        let detector = PeriodicDetector {
            thickness: 0,
            ..PeriodicDetector::default()
        };
        let mut canvas = GrayImage::new(50, 50);
        let segment = LineSegment {
            start: Point::new(5.0, 5.0),
            end: Point::new(40.0, 40.0),
        };
        detector.paint(&mut canvas, &segment);
        assert_eq!(canvas.get_pixel(20, 20)[0], MASK_ON);
        assert_eq!(canvas.get_pixel(20, 25)[0], 0);
    }

    #[test]
    fn horizontal_lines_are_ignored() {
        let gray = GrayImage::from_fn(300, 300, |_, y| {
            if y % 30 < 3 {
                Luma([30])
            } else {
                Luma([220])
            }
        });
        assert!(PeriodicDetector::default().detect(&gray).is_empty());
    }
}
