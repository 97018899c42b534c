//! slot_probe - classify a still image against one lane's slot map.
//!
//! Useful when placing cameras or tuning the occupancy threshold: prints the
//! foreground pixel count and verdict per slot and writes an annotated copy.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use parking_sentinel::config::ParkingdConfig;
use parking_sentinel::lane::classify_frame;
use parking_sentinel::{AdaptiveThresholdBackend, Frame};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Classify a still image against a configured parking lane"
)]
struct Args {
    /// Config file (JSON or TOML); defaults are used when absent.
    #[arg(long, env = "PARKING_CONFIG")]
    config: Option<PathBuf>,

    /// Lane number (1-based) whose slot map to apply.
    #[arg(long, default_value = "1")]
    lane: u8,

    /// Still image to classify.
    #[arg(long)]
    image: PathBuf,

    /// Where to write the annotated copy (default: <image>_annotated.jpg).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Override the configured occupancy threshold.
    #[arg(long)]
    threshold: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ParkingdConfig::load_from(args.config.as_deref())?;
    let layout = config
        .lane_layouts()
        .into_iter()
        .find(|l| l.lane == args.lane)
        .ok_or_else(|| anyhow!("lane {} is not configured", args.lane))?;
    let threshold = args.threshold.unwrap_or(config.occupancy_threshold);

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("read {}", args.image.display()))?;
    let frame = Frame::decode(&bytes)?;
    log::info!(
        "lane {} ({}): {}x{} image, {} slots, threshold {}",
        layout.lane,
        layout.camera_id,
        frame.width(),
        frame.height(),
        layout.total_slots(),
        threshold
    );

    let mut backend = AdaptiveThresholdBackend::new(threshold);
    for (rect, slot_id) in layout.slots.iter().zip(layout.slot_ids()) {
        let foreground = frame
            .crop(*rect)
            .map(|region| backend.foreground_pixels(&region))
            .unwrap_or(0);
        println!(
            "slot {:>3} [{:>4} {:>4} {:>4} {:>4}] foreground {:>5} -> {}",
            slot_id,
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            foreground,
            if foreground > threshold { "F" } else { "E" }
        );
    }

    let result = classify_frame(&frame, &layout, None, &mut backend);
    println!(
        "lane {}: {} of {} occupied, {} available",
        result.lane,
        result.occupied,
        result.total(),
        result.available()
    );

    let out = args.out.unwrap_or_else(|| {
        let stem = args
            .image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".to_string());
        args.image.with_file_name(format!("{}_annotated.jpg", stem))
    });
    result.frame.write_jpeg(&out)?;
    println!("annotated image written to {}", out.display());
    Ok(())
}
