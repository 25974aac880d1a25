use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watermark_inpaint::model::{DEFAULT_MODEL_PATH, DEFAULT_RESOLUTION};
use watermark_inpaint::{
    default_mask_path, default_output_path, EngineConfig, InpaintConfig, MaskSource,
    ProcessOptions, ProcessResult, RemovalEngine,
};

#[derive(Parser)]
#[command(
    name = "watermark-inpaint",
    about = "Detect overlaid watermarks and remove them with neural inpainting",
    version,
    after_help = "Simple usage: watermark-inpaint <image>  (auto-detect, writes <name>_cleaned.<ext>)\n\n\
                  Pixels outside the mask are never modified. Faces and strong edges are\n\
                  protected from automatic masks."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: String,

    /// Mask image; white marks pixels to remove (default: AUTO, detect automatically)
    #[arg(short, long)]
    mask: Option<String>,

    /// Output file or directory (default: {name}_cleaned.{ext})
    #[arg(short, long)]
    output: Option<String>,

    /// ONNX inpainting model
    #[arg(long, env = "WATERMARK_INPAINT_MODEL", default_value = DEFAULT_MODEL_PATH)]
    model: PathBuf,

    /// SeetaFace model for face protection (default: bundled frontal model)
    #[arg(long, env = "WATERMARK_INPAINT_FACE_MODEL")]
    face_model: Option<PathBuf>,

    /// Do not protect faces from removal
    #[arg(long, conflicts_with = "face_model")]
    no_face_protection: bool,

    /// Square input resolution of the model
    #[arg(long, default_value_t = DEFAULT_RESOLUTION)]
    resolution: u32,

    /// Intra-op inference threads (0 = runtime default)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Write intermediate masks as PNGs into this directory
    #[arg(long, value_name = "DIR")]
    debug_masks: Option<PathBuf>,

    /// Write the detected mask instead of removing the watermark
    #[arg(long)]
    detect_only: bool,

    /// Use the removal mask exactly as detected or given, without dilation
    #[arg(long)]
    no_dilate: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("watermark_inpaint={log_level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let opts = ProcessOptions {
        dilate_mask: !cli.no_dilate,
        detect_only: cli.detect_only,
        debug_dir: cli.debug_masks.clone(),
        verbose: cli.verbose,
        quiet: cli.quiet,
        ..ProcessOptions::default()
    };

    let input_path = Path::new(&cli.input);
    if !input_path.exists() {
        eprintln!("Error: Input path does not exist: {}", cli.input);
        process::exit(1);
    }

    let mask = MaskSource::parse(cli.mask.as_deref().unwrap_or(MaskSource::AUTO_SENTINEL));
    if input_path.is_dir() && mask != MaskSource::Auto {
        eprintln!("Error: --mask applies to a single image; batch mode always auto-detects");
        process::exit(1);
    }

    let config = EngineConfig {
        inpaint: InpaintConfig {
            model_path: cli.model.clone(),
            resolution: cli.resolution,
            intra_threads: cli.threads,
        },
        face_model: cli.face_model.clone(),
        skip_face_protection: cli.no_face_protection,
        ..EngineConfig::default()
    };

    let engine = match RemovalEngine::new(config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Fatal: Failed to initialize engine: {e}");
            process::exit(1);
        }
    };

    if !opts.quiet {
        match &mask {
            MaskSource::Auto => eprintln!("Auto-detection enabled"),
            MaskSource::File(path) => eprintln!("Using mask: {}", path.display()),
        }
        if opts.detect_only {
            eprintln!("Detect-only mode: writing masks, model is not run");
        }
        eprintln!();
    }

    let results = if input_path.is_dir() {
        let output_dir = if let Some(o) = &cli.output {
            PathBuf::from(o)
        } else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: watermark-inpaint <input_dir> -o <output_dir>");
            process::exit(1);
        };
        engine.process_directory(input_path, &output_dir, &opts)
    } else {
        let output_path = match &cli.output {
            Some(o) => PathBuf::from(o),
            None if opts.detect_only => default_mask_path(input_path),
            None => default_output_path(input_path),
        };
        vec![engine.process_file(input_path, &output_path, &mask, &opts)]
    };

    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fail_count = 0u32;

    for r in &results {
        print_result(r, &opts);
        if !r.success {
            fail_count += 1;
        } else if r.unchanged && !opts.detect_only {
            skip_count += 1;
        } else {
            success_count += 1;
        }
    }

    if results.len() > 1 && !opts.quiet {
        eprintln!();
        eprint!("[Summary] Processed: {success_count}");
        if skip_count > 0 {
            eprint!(", Unchanged: {skip_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

fn print_result(result: &ProcessResult, opts: &ProcessOptions) {
    if opts.quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if !result.success {
        match result.category {
            Some(category) => {
                eprintln!("[FAIL] {filename} ({category:?}): {}", result.message);
            }
            None => eprintln!("[FAIL] {filename}: {}", result.message),
        }
    } else if result.unchanged && !opts.detect_only {
        eprintln!("[SKIP] {filename}: {}", result.message);
    } else {
        eprintln!("[OK] {filename} ({} px masked)", result.mask_area);
    }

    if opts.verbose && result.success {
        if let Some(output) = &result.output {
            eprintln!("  -> {}", output.display());
        }
    }
}
