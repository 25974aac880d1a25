use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::{Array4, ArrayD, IxDyn};
use watermark_inpaint::detectors::Detector;
use watermark_inpaint::fusion::SignalGroup;
use watermark_inpaint::{
    Compositor, ConfidenceMap, EngineConfig, Error, ErrorCategory, FaceDetector, FaceRegion,
    InpaintBackend, InpaintConfig, Mask, MaskSource, NeuralInpainter, ProcessOptions, Raster,
    RemovalEngine, Result, Segmenter,
};

/// Fills every pixel with one value and counts how often it runs.
struct Constant {
    value: f32,
    calls: AtomicUsize,
}

impl Constant {
    fn new(value: f32) -> Arc<Self> {
        Arc::new(Self {
            value,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InpaintBackend for Constant {
    fn resolution(&self) -> u32 {
        64
    }

    fn infer(&self, image: Array4<f32>, _mask: Array4<f32>) -> Result<ArrayD<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ArrayD::from_elem(IxDyn(image.shape()), self.value))
    }
}

/// Returns its input unchanged.
struct Identity;

impl InpaintBackend for Identity {
    fn resolution(&self) -> u32 {
        64
    }

    fn infer(&self, image: Array4<f32>, _mask: Array4<f32>) -> Result<ArrayD<f32>> {
        Ok(image.into_dyn())
    }
}

/// Drops the channel axis, like a graph exported with the wrong output.
struct Malformed;

impl InpaintBackend for Malformed {
    fn resolution(&self) -> u32 {
        32
    }

    fn infer(&self, _image: Array4<f32>, _mask: Array4<f32>) -> Result<ArrayD<f32>> {
        Ok(ArrayD::zeros(IxDyn(&[1, 32, 32])))
    }
}

struct FixedFace(FaceRegion);

impl FaceDetector for FixedFace {
    fn detect(&self, _gray: &GrayImage) -> Vec<FaceRegion> {
        vec![self.0]
    }
}

/// Fires on every pixel.
struct Everywhere;

impl Detector for Everywhere {
    fn name(&self) -> &'static str {
        "everywhere"
    }

    fn confidence(&self, gray: &GrayImage) -> ConfidenceMap {
        let (w, h) = gray.dimensions();
        ConfidenceMap::from_gray(GrayImage::from_pixel(w, h, Luma([255])))
    }
}

fn engine_with(backend: Arc<dyn InpaintBackend>) -> RemovalEngine {
    RemovalEngine::with_backend(Segmenter::default(), backend, Compositor::default())
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("watermark_inpaint_it_{name}"))
}

fn block_mask(w: u32, h: u32, x0: u32, y0: u32, side: u32) -> Mask {
    let mut mask = Mask::empty(w, h);
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            mask.set(x, y);
        }
    }
    mask
}

/// Assert every pixel outside `mask` is byte-identical.
fn assert_untouched_outside(original: &Raster, output: &Raster, mask: &Mask) {
    assert_eq!(original.dimensions(), output.dimensions());
    assert_eq!(original.channels(), output.channels());
    let (w, _) = original.dimensions();
    let channels = usize::from(original.channels());
    for (i, (a, b)) in original
        .as_bytes()
        .chunks(channels)
        .zip(output.as_bytes().chunks(channels))
        .enumerate()
    {
        let (x, y) = ((i as u32) % w, (i as u32) / w);
        if !mask.is_set(x, y) {
            assert_eq!(a, b, "pixel ({x}, {y}) changed outside the mask");
        }
    }
}

fn textured_gray(w: u32, h: u32) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| Luma([((x * 37 + y * 11) % 251) as u8]))
}

/// Share of `pixels` covered by `mask`, and mask pixels outside `keep`.
fn coverage(
    mask: &Mask,
    pixels: &[(u32, u32)],
    keep: impl Fn(u32, u32) -> bool,
) -> (f64, usize) {
    let hit = pixels.iter().filter(|&&(x, y)| mask.is_set(x, y)).count();
    let (w, h) = mask.dimensions();
    let stray = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .filter(|&(x, y)| mask.is_set(x, y) && !keep(x, y))
        .count();
    (hit as f64 / pixels.len() as f64, stray)
}

/// Three ring-shaped glyphs, 16x24 with 4 px strokes, lighter than the page.
fn ring_word(x: u32, y: u32) -> bool {
    (0..3).any(|i| {
        let gx = 95 + i * 22;
        if !(gx..gx + 16).contains(&x) || !(116..140).contains(&y) {
            return false;
        }
        let (lx, ly) = (x - gx, y - 116);
        lx < 4 || lx >= 12 || ly < 4 || ly >= 20
    })
}

/// Diagonal hatching inside a 240 px square.
fn hatch_stamp(x: u32, y: u32) -> bool {
    (120..360).contains(&x) && (120..360).contains(&y) && (x + 24 * 20 - y) % 24 < 3
}

#[test]
fn removal_is_bit_exact_outside_mask_for_every_layout() {
    let engine = engine_with(Constant::new(0.5));
    let (w, h) = (90, 70);
    let mask = block_mask(w, h, 20, 15, 25);

    let gray = textured_gray(w, h);
    let rgb = RgbImage::from_fn(w, h, |x, y| {
        Rgb([(x * 3) as u8, (y * 3) as u8, ((x + y) % 256) as u8])
    });
    let rgba = RgbaImage::from_fn(w, h, |x, y| {
        Rgba([(y * 2) as u8, (x * 2) as u8, 90, ((x * y) % 256) as u8])
    });

    for original in [Raster::Gray(gray), Raster::Rgb(rgb), Raster::Rgba(rgba)] {
        let output = engine.remove(&original, &mask).unwrap();
        assert_untouched_outside(&original, &output, &mask);
        assert_ne!(original, output, "masked region should be replaced");

        if let (Raster::Rgba(before), Raster::Rgba(after)) = (&original, &output) {
            for (a, b) in before.pixels().zip(after.pixels()) {
                assert_eq!(a[3], b[3], "alpha must be preserved");
            }
        }
    }
}

#[test]
fn dilation_never_shrinks_a_mask() {
    let mut mask = Mask::empty(60, 60);
    for (x, y) in [(3, 4), (30, 30), (31, 30), (58, 59), (10, 50)] {
        mask.set(x, y);
    }
    let mut previous = mask.clone();
    for radius in 1..=4 {
        let dilated = mask.dilate(radius);
        assert_eq!(dilated.and(&previous), previous, "radius {radius} lost pixels");
        assert!(dilated.area() >= previous.area());
        previous = dilated;
    }
}

#[test]
fn protected_face_is_never_masked() {
    let (w, h) = (240, 240);
    // Diagonal grid over the whole frame, a face box in the middle.
    let image = Raster::Gray(GrayImage::from_fn(w, h, |x, y| {
        if (x + y) % 30 < 3 {
            Luma([60])
        } else {
            Luma([190])
        }
    }));
    let face = FaceRegion {
        x: 90,
        y: 100,
        width: 60,
        height: 60,
    };
    let segmenter = Segmenter::default()
        .with_detector(Box::new(Everywhere))
        .with_group(SignalGroup::new("everywhere", &["everywhere"]))
        .with_face_detector(Arc::new(FixedFace(face)));
    let engine = RemovalEngine::with_backend(segmenter, Constant::new(1.0), Compositor::default());

    let seg = engine.detect(&image);
    assert!(seg.mask.and(&seg.protection).is_empty());

    let (x0, y0, x1, y1) = face.expanded();
    for y in y0..y1 {
        for x in x0..x1 {
            let (x, y) = (x as u32, y as u32);
            assert!(seg.protection.is_set(x, y), "face pixel ({x}, {y}) unprotected");
            assert!(!seg.mask.is_set(x, y), "face pixel ({x}, {y}) masked");
        }
    }

    let output = engine.remove(&image, &seg.mask).unwrap();
    assert_untouched_outside(&image, &output, &seg.mask);
}

#[test]
fn uniform_image_is_returned_unchanged_without_inference() {
    let backend = Constant::new(0.0);
    let engine = engine_with(backend.clone());
    let image = Raster::Rgb(RgbImage::from_pixel(160, 120, Rgb([128, 128, 128])));

    let mask = engine.segmenter().detect(&image);
    assert!(mask.is_empty());
    let output = engine.remove(&image, &mask).unwrap();
    assert_eq!(output, image);
    assert_eq!(backend.calls(), 0);

    let input = temp_path("uniform_in.png");
    let out = temp_path("uniform_out.png");
    image.clone().into_dynamic().save(&input).unwrap();
    let result = engine.process_file(&input, &out, &MaskSource::Auto, &ProcessOptions::default());
    let written = Raster::open(&out);
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&out);

    assert!(result.success, "{}", result.message);
    assert!(result.unchanged);
    assert_eq!(result.mask_area, 0);
    assert_eq!(written.unwrap(), image);
    assert_eq!(backend.calls(), 0);
}

fn mean_abs_error(a: &RgbImage, b: &RgbImage) -> f64 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    total as f64 / a.as_raw().len() as f64
}

#[test]
fn inference_wrapper_is_stable_across_aspect_ratios() {
    let inpainter = NeuralInpainter::new(Arc::new(Identity));
    let gradient = |w: u32, h: u32| {
        RgbImage::from_fn(w, h, |x, y| {
            let v = (x * 255 / (w - 1)) as u8;
            let u = (y * 255 / (h - 1)) as u8;
            Rgb([v, u, 128])
        })
    };

    let errors: Vec<f64> = [(200, 100), (120, 180)]
        .into_iter()
        .map(|(w, h)| {
            let source = gradient(w, h);
            let out = inpainter
                .inpaint(&Raster::Rgb(source.clone()), &block_mask(w, h, 10, 10, 20))
                .unwrap();
            assert_eq!(out.dimensions(), (w, h));
            mean_abs_error(&source, &out)
        })
        .collect();

    for e in &errors {
        assert!(*e < 6.0, "round trip error too large: {e}");
    }
    assert!((errors[0] - errors[1]).abs() < 3.0, "errors diverge: {errors:?}");
}

#[test]
fn missing_model_is_fatal_and_writes_nothing() {
    let output = temp_path("never_written.png");
    let _ = std::fs::remove_file(&output);

    let config = EngineConfig {
        inpaint: InpaintConfig {
            model_path: PathBuf::from("/nonexistent/models/lama.onnx"),
            ..InpaintConfig::default()
        },
        ..EngineConfig::default()
    };
    let err = RemovalEngine::new(config).unwrap_err();

    assert!(matches!(err, Error::ModelNotFound { .. }));
    assert_eq!(err.category(), ErrorCategory::Resource);
    assert!(err.to_string().contains("/nonexistent/models/lama.onnx"));
    assert!(!output.exists());
}

#[test]
fn black_square_is_replaced_and_nothing_else_changes() {
    let image = Raster::Gray(GrayImage::from_fn(200, 200, |x, y| {
        if (80..120).contains(&x) && (80..120).contains(&y) {
            Luma([0])
        } else {
            Luma([200])
        }
    }));
    let mask = block_mask(200, 200, 80, 80, 40);

    let input = temp_path("square_in.png");
    let mask_path = temp_path("square_mask.png");
    let output = temp_path("square_out.png");
    image.clone().into_dynamic().save(&input).unwrap();
    mask.as_image().save(&mask_path).unwrap();

    let engine = engine_with(Constant::new(0.5));
    let opts = ProcessOptions {
        dilate_mask: false,
        ..ProcessOptions::default()
    };
    let result = engine.process_file(&input, &output, &MaskSource::File(mask_path.clone()), &opts);
    let written = Raster::open(&output);
    for p in [&input, &mask_path, &output] {
        let _ = std::fs::remove_file(p);
    }

    assert!(result.success, "{}", result.message);
    assert_eq!(result.mask_area, 1600);
    let written = written.unwrap();
    assert_untouched_outside(&image, &written, &mask);
    let Raster::Gray(out) = written else {
        panic!("gray input must stay gray");
    };
    for y in 80..120 {
        for x in 80..120 {
            assert!(out.get_pixel(x, y)[0] > 100, "({x}, {y}) still dark");
        }
    }
}

#[test]
fn malformed_model_output_is_an_integration_error() {
    let engine = engine_with(Arc::new(Malformed));
    let image = Raster::Gray(textured_gray(40, 40));
    let err = engine
        .remove(&image, &block_mask(40, 40, 5, 5, 10))
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert_eq!(err.category(), ErrorCategory::Integration);

    let input = temp_path("malformed_in.png");
    let mask_path = temp_path("malformed_mask.png");
    let output = temp_path("malformed_out.png");
    let _ = std::fs::remove_file(&output);
    image.clone().into_dynamic().save(&input).unwrap();
    block_mask(40, 40, 5, 5, 10).as_image().save(&mask_path).unwrap();
    let result = engine.process_file(
        &input,
        &output,
        &MaskSource::File(mask_path.clone()),
        &ProcessOptions::default(),
    );
    let exists = output.exists();
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&mask_path);

    assert!(!result.success);
    assert_eq!(result.category, Some(ErrorCategory::Integration));
    assert!(!exists, "failed request must not leave an output file");
}

#[test]
fn byte_range_model_output_is_used_as_is() {
    let engine = engine_with(Constant::new(200.0));
    let image = Raster::Rgb(RgbImage::new(50, 50));
    let mask = block_mask(50, 50, 10, 10, 20);
    let Raster::Rgb(out) = engine.remove(&image, &mask).unwrap() else {
        panic!("layout changed");
    };
    for c in out.get_pixel(20, 20).0 {
        assert!(c.abs_diff(200) <= 2, "got {c}");
    }
}

#[test]
fn unreadable_mask_is_an_input_error() {
    let input = temp_path("nomask_in.png");
    Raster::Gray(textured_gray(20, 20))
        .into_dynamic()
        .save(&input)
        .unwrap();
    let result = engine_with(Constant::new(0.5)).process_file(
        &input,
        &temp_path("nomask_out.png"),
        &MaskSource::File(PathBuf::from("/nonexistent/mask.png")),
        &ProcessOptions::default(),
    );
    let _ = std::fs::remove_file(&input);

    assert!(!result.success);
    assert_eq!(result.category, Some(ErrorCategory::Input));
    assert!(result.message.contains("/nonexistent/mask.png"));
}

#[test]
fn detect_only_writes_a_binary_mask_without_inference() {
    let backend = Constant::new(0.5);
    let engine = engine_with(backend.clone());
    let input = temp_path("detect_in.png");
    let output = temp_path("detect_mask.png");
    Raster::Gray(textured_gray(80, 60))
        .into_dynamic()
        .save(&input)
        .unwrap();

    let opts = ProcessOptions {
        detect_only: true,
        ..ProcessOptions::default()
    };
    let result = engine.process_file(&input, &output, &MaskSource::Auto, &opts);
    let written = image::open(&output).map(|i| i.to_luma8());
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);

    assert!(result.success, "{}", result.message);
    let written = written.unwrap();
    assert_eq!(written.dimensions(), (80, 60));
    assert!(written.iter().all(|&v| v == 0 || v == 255));
    assert_eq!(backend.calls(), 0);
}

#[test]
fn debug_dump_writes_every_layer() {
    let dir = temp_path("debug_dir");
    let _ = std::fs::remove_dir_all(&dir);
    let input = temp_path("debug_in.png");
    Raster::Gray(GrayImage::from_pixel(48, 48, Luma([90])))
        .into_dynamic()
        .save(&input)
        .unwrap();

    let opts = ProcessOptions {
        detect_only: true,
        debug_dir: Some(dir.clone()),
        ..ProcessOptions::default()
    };
    let output = temp_path("debug_mask.png");
    let result = engine_with(Constant::new(0.5)).process_file(&input, &output, &MaskSource::Auto, &opts);
    let dumped: Vec<String> = std::fs::read_dir(&dir)
        .map(|rd| {
            rd.filter_map(std::result::Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    let _ = std::fs::remove_dir_all(&dir);
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);

    assert!(result.success, "{}", result.message);
    for layer in ["protection", "saliency", "candidate", "mask", "signal_texture"] {
        let name = format!("watermark_inpaint_it_debug_in_{layer}.png");
        assert!(dumped.contains(&name), "missing {name} in {dumped:?}");
    }
}

#[test]
fn batch_mode_processes_only_images() {
    let input_dir = temp_path("batch_in");
    let output_dir = temp_path("batch_out");
    let _ = std::fs::remove_dir_all(&input_dir);
    let _ = std::fs::remove_dir_all(&output_dir);
    std::fs::create_dir_all(&input_dir).unwrap();
    for name in ["a.png", "b.bmp"] {
        Raster::Gray(GrayImage::from_pixel(32, 32, Luma([40])))
            .into_dynamic()
            .save(input_dir.join(name))
            .unwrap();
    }
    std::fs::write(input_dir.join("notes.txt"), "not an image").unwrap();

    let results = engine_with(Constant::new(0.5)).process_directory(
        &input_dir,
        &output_dir,
        &ProcessOptions::default(),
    );
    let written = |name: &str| Path::new(&output_dir).join(name).exists();
    let (a, b) = (written("a.png"), written("b.bmp"));
    let _ = std::fs::remove_dir_all(&input_dir);
    let _ = std::fs::remove_dir_all(&output_dir);

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success && r.unchanged));
    assert!(a && b);
}

#[test]
fn faint_text_overlay_is_detected_by_the_default_pipeline() {
    let (w, h) = (256, 256);
    let image = Raster::Gray(GrayImage::from_fn(w, h, |x, y| {
        if ring_word(x, y) {
            Luma([160])
        } else {
            Luma([120])
        }
    }));
    let seg = Segmenter::default().segment(&image);

    let glyphs: Vec<(u32, u32)> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .filter(|&(x, y)| ring_word(x, y))
        .collect();
    let near_word = |x: u32, y: u32| (79..171).contains(&x) && (100..156).contains(&y);
    let (covered, stray) = coverage(&seg.mask, &glyphs, near_word);

    assert!(seg.protection.is_empty());
    assert!(covered >= 0.6, "glyph coverage {covered:.2}");
    assert_eq!(stray, 0);
}

#[test]
fn diagonal_hatch_is_detected_by_the_default_pipeline() {
    let (w, h) = (480, 480);
    let image = Raster::Gray(GrayImage::from_fn(w, h, |x, y| {
        if hatch_stamp(x, y) {
            Luma([160])
        } else {
            Luma([220])
        }
    }));
    let seg = Segmenter::default().segment(&image);

    assert!(seg.protection.is_empty());
    assert!(seg.signals.get("periodic").is_some_and(|m| !m.is_empty()));
    let lines: Vec<(u32, u32)> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .filter(|&(x, y)| hatch_stamp(x, y))
        .collect();
    let near_stamp = |x: u32, y: u32| (100..380).contains(&x) && (100..380).contains(&y);
    let (covered, stray) = coverage(&seg.mask, &lines, near_stamp);

    assert!(covered > 0.05, "line coverage {covered:.3}");
    assert_eq!(stray, 0);
}

#[test]
fn batch_detect_only_writes_png_masks() {
    let input_dir = temp_path("batch_detect_in");
    let output_dir = temp_path("batch_detect_out");
    let _ = std::fs::remove_dir_all(&input_dir);
    let _ = std::fs::remove_dir_all(&output_dir);
    std::fs::create_dir_all(&input_dir).unwrap();
    Raster::Gray(textured_gray(64, 48))
        .into_dynamic()
        .save(input_dir.join("photo.jpg"))
        .unwrap();

    let backend = Constant::new(0.5);
    let opts = ProcessOptions {
        detect_only: true,
        ..ProcessOptions::default()
    };
    let results = engine_with(backend.clone()).process_directory(&input_dir, &output_dir, &opts);
    let mask = image::open(output_dir.join("photo_mask.png")).map(|i| i.to_luma8());
    let jpeg_written = output_dir.join("photo.jpg").exists();
    let _ = std::fs::remove_dir_all(&input_dir);
    let _ = std::fs::remove_dir_all(&output_dir);

    assert_eq!(results.len(), 1);
    assert!(results[0].success, "{}", results[0].message);
    assert!(!jpeg_written);
    let mask = mask.unwrap();
    assert_eq!(mask.dimensions(), (64, 48));
    assert!(mask.iter().all(|&v| v == 0 || v == 255));
    assert_eq!(backend.calls(), 0);
}

#[test]
fn auto_mask_grows_but_stays_off_protected_pixels() {
    let image = Raster::Gray(GrayImage::from_fn(256, 256, |x, y| {
        if ring_word(x, y) {
            Luma([160])
        } else {
            Luma([120])
        }
    }));
    let engine = engine_with(Constant::new(0.5));
    let seg = engine.detect(&image);
    let prepared = engine.prepare_auto_mask(&seg, &ProcessOptions::default());

    assert!(!seg.mask.is_empty());
    assert!(prepared.area() > seg.mask.area());
    assert_eq!(prepared.and(&seg.mask), seg.mask);
    assert!(prepared.and(&seg.protection).is_empty());
}
