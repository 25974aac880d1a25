//! Remove a watermark from a single image, optionally with a hand-drawn mask.
//!
//! Usage:
//! ```sh
//! cargo run --example remove_watermark -- input.jpg output.jpg [mask.png]
//! ```

use std::env;
use std::process;

use watermark_inpaint::{EngineConfig, MaskSource, ProcessOptions, RemovalEngine};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <output> [mask]", args[0]);
        process::exit(1);
    }

    let input = &args[1];
    let output = &args[2];
    let mask = MaskSource::parse(args.get(3).map_or(MaskSource::AUTO_SENTINEL, String::as_str));

    let engine = RemovalEngine::new(EngineConfig::default()).expect("failed to initialize engine");
    let opts = ProcessOptions::default();
    let result = engine.process_file(input.as_ref(), output.as_ref(), &mask, &opts);

    if !result.success {
        eprintln!("Error: {}", result.message);
        process::exit(1);
    } else if result.unchanged {
        println!("Unchanged: {}", result.message);
    } else {
        println!("Done: {}", result.message);
    }
}
