//! demo - end-to-end synthetic run of the wafer inspection pipeline
//!
//! Runs the CPU backend over a generated wafer image, a synthetic video clip
//! and a synthetic camera, writing recordings and stills to `--out`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use wafer_inspect::config::AppConfig;
use wafer_inspect::ui::{Ui, UiMode};
use wafer_inspect::{DetectionController, RunOutcome, SourceKind};

const RUN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output directory for recordings and stills.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Frames in the synthetic video clip.
    #[arg(long, default_value_t = 24)]
    frames: u32,
    /// Camera frames to process before stopping.
    #[arg(long, default_value_t = 3)]
    camera_frames: u64,
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.frames == 0 {
        return Err(anyhow!("frames must be >= 1"));
    }

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut config = AppConfig::default();
    config.results_dir = out_dir.join("results");
    config.sources.camera_device_template = "stub://bench".to_string();
    config.output.record_camera = true;

    let ui = Ui::detect(args.ui);
    let mut controller = DetectionController::from_config(config)?;

    {
        let _stage = ui.stage("image");
        let image_path = out_dir.join("wafer.png");
        write_sample_wafer(&image_path)?;
        controller.start(SourceKind::Image, &image_path.to_string_lossy(), 0.25, 0.45)?;
        finish(&mut controller)?;
        print!("{}", controller.sink().table());
        let saved = controller.save_last_result()?;
        println!("saved {}", saved.display());
    }

    {
        let _stage = ui.stage("video");
        let clip = format!("stub://line?frames={}", args.frames);
        controller.start(SourceKind::Video, &clip, 0.25, 0.45)?;
        finish(&mut controller)?;
        println!(
            "{} frames, video {}",
            controller.sink().stats().frames_handled,
            controller
                .last_saved_video()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "not recorded".to_string())
        );
    }

    {
        let _stage = ui.stage("camera");
        controller.start(SourceKind::Camera, "0", 0.25, 0.45)?;
        let deadline = Instant::now() + RUN_TIMEOUT;
        while controller.sink().stats().frames_handled < args.camera_frames {
            if Instant::now() >= deadline {
                return Err(anyhow!("camera produced no frames in time"));
            }
            controller.pump_events_timeout(Duration::from_millis(50));
        }
        let snapshot = controller.save_last_result()?;
        let summary = controller
            .stop()
            .ok_or_else(|| anyhow!("camera run was not active"))?;
        println!(
            "snapshot {}, camera {:?} after {} frames",
            snapshot.display(),
            summary.outcome,
            summary.frames_emitted
        );
    }

    println!("{}", controller.status());
    Ok(())
}

fn finish(controller: &mut DetectionController) -> Result<()> {
    let summary = controller
        .wait_for_finish(RUN_TIMEOUT)
        .ok_or_else(|| anyhow!("run did not finish within {:?}", RUN_TIMEOUT))?;
    match summary.outcome {
        RunOutcome::Failed(err) => Err(err.into()),
        _ => Ok(()),
    }
}

/// Grey wafer with one particle and one scratch.
fn write_sample_wafer(path: &Path) -> Result<()> {
    let mut image = RgbImage::from_pixel(320, 240, Rgb([60, 64, 70]));
    for y in 60..84 {
        for x in 80..104 {
            image.put_pixel(x, y, Rgb([235, 215, 60]));
        }
    }
    for y in 170..176 {
        for x in 120..260 {
            image.put_pixel(x, y, Rgb([210, 70, 60]));
        }
    }
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
