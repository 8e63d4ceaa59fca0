use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nosemark_core::{
    load_into, spawn_loader, ClassifierSlot, Frame, FrameAnnotator, FrameReport, HaarCascade,
    LoadJob,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod feed;

use config::Config;

#[derive(Parser)]
#[command(name = "nosemark", about = "Mark noses on camera frames")]
struct Cli {
    /// Config file (TOML); defaults to $NOSEMARK_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate a single image
    Annotate {
        /// Input image
        input: PathBuf,
        /// Where to write the annotated image
        #[arg(short, long)]
        output: PathBuf,
        /// Print the detection report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Feed every image in a directory through the annotator, in name order
    Run {
        /// Directory of frames
        dir: PathBuf,
        /// Directory for annotated frames
        #[arg(short, long)]
        output: PathBuf,
        /// Block until both cascades have loaded before the first frame
        #[arg(long)]
        wait_for_models: bool,
        /// Write one JSON report line per frame to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Load a cascade file and print its shape
    Inspect {
        /// Cascade XML file
        cascade: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// One line of the `run --report` output.
#[derive(Serialize)]
struct FrameRecord<'a> {
    file: &'a str,
    #[serde(flatten)]
    report: &'a FrameReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Annotate {
            input,
            output,
            json,
        } => {
            let config = Config::load(cli.config.as_deref()).context("loading config")?;
            annotate_one(&config, &input, &output, json)
        }
        Commands::Run {
            dir,
            output,
            wait_for_models,
            report,
        } => {
            let config = Config::load(cli.config.as_deref()).context("loading config")?;
            run_dir(&config, &dir, &output, wait_for_models, report.as_deref()).await
        }
        Commands::Inspect { cascade, json } => inspect(&cascade, json),
    }
}

fn annotate_one(config: &Config, input: &Path, output: &Path, json: bool) -> Result<()> {
    let face = Arc::new(ClassifierSlot::empty("face"));
    let nose = Arc::new(ClassifierSlot::empty("nose"));
    for (slot, path) in [
        (&face, config.face_cascade_path()),
        (&nose, config.nose_cascade_path()),
    ] {
        if let Err(e) = load_into(slot, &path) {
            tracing::error!(
                slot = slot.name(),
                path = %path.display(),
                error = %e,
                "classifier unavailable; its detection pass will be skipped"
            );
        }
    }

    let mut annotator = FrameAnnotator::new(face, nose, config.annotator_settings());
    let frame = read_frame(input)?;
    let annotated = annotator.annotate(&frame);
    write_frame(annotated.frame, output)?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        faces = annotated.report.faces.len(),
        markers = annotated.report.markers.len(),
        "image annotated"
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&annotated.report)?);
    }
    Ok(())
}

async fn run_dir(
    config: &Config,
    dir: &Path,
    out_dir: &Path,
    wait_for_models: bool,
    report: Option<&Path>,
) -> Result<()> {
    let frames = list_frames(dir)?;
    if frames.is_empty() {
        tracing::warn!(dir = %dir.display(), "no image files found");
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let face = Arc::new(ClassifierSlot::empty("face"));
    let nose = Arc::new(ClassifierSlot::empty("nose"));
    let loader = spawn_loader(vec![
        LoadJob {
            slot: Arc::clone(&face),
            path: config.face_cascade_path(),
        },
        LoadJob {
            slot: Arc::clone(&nose),
            path: config.nose_cascade_path(),
        },
    ])
    .context("spawning cascade loader")?;

    if wait_for_models {
        let outcomes = tokio::task::spawn_blocking(move || loader.join())
            .await?
            .map_err(|_| anyhow::anyhow!("cascade loader panicked"))?;
        let ready = outcomes.iter().filter(|o| o.result.is_ok()).count();
        tracing::info!(ready, total = outcomes.len(), "cascade loading finished");
    }

    let feed = feed::spawn_feed(FrameAnnotator::new(face, nose, config.annotator_settings()))?;

    let mut report_out = match report {
        Some(path) => Some(std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };

    let mut written = 0usize;
    for path in &frames {
        let input = path.clone();
        let frame = match tokio::task::spawn_blocking(move || read_frame(&input)).await? {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable frame");
                continue;
            }
        };

        let annotated = feed.annotate(frame).await?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(out) = report_out.as_mut() {
            let record = FrameRecord {
                file: &name,
                report: &annotated.report,
            };
            serde_json::to_writer(&mut *out, &record)?;
            writeln!(out)?;
        }

        let target = out_dir.join(&name);
        if let Err(e) =
            tokio::task::spawn_blocking(move || write_frame(annotated.frame, &target)).await?
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to write annotated frame");
            continue;
        }
        written += 1;
    }

    if let Some(mut out) = report_out {
        out.flush()?;
    }
    tracing::info!(frames = written, out_dir = %out_dir.display(), "run complete");
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let cascade =
        HaarCascade::load(path).with_context(|| format!("loading cascade {}", path.display()))?;
    let summary = cascade.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Cascade:           {}", path.display());
        println!("Layout:            {:?}", summary.layout);
        println!(
            "Window:            {}x{}",
            summary.window.width, summary.window.height
        );
        println!("Stages:            {}", summary.stages);
        println!("Weak classifiers:  {}", summary.weak_classifiers);
        println!("Features:          {}", summary.features);
        println!("Tilted features:   {}", summary.tilted);
    }
    Ok(())
}

/// Image files in `dir`, sorted by file name.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && image::ImageFormat::from_path(path).is_ok())
        .collect();
    frames.sort();
    Ok(frames)
}

fn read_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    Ok(Frame::from_image(image.to_rgba8()))
}

fn write_frame(frame: Frame, path: &Path) -> Result<()> {
    let image = image::DynamicImage::ImageRgba8(frame.into_image()?);
    // JPEG has no alpha channel.
    let image = match image::ImageFormat::from_path(path) {
        Ok(image::ImageFormat::Jpeg) => image::DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
