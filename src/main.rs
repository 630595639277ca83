// Command-line driver: segments each input image, writes a boxed copy next to the
// optional mask dumps, and prints the pill count per image.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use pill_vision::core_modules::utils::image_helper::image_helper;
use pill_vision::parallel_pipeline::{ParallelPipeline, Segmented};
use pill_vision::pipeline::{BoundingBox, PipelineConfig, Report, Segmentation};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "pill_vision", about = "Count touching pills in still photographs")]
struct Args {
    /// Input images.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for annotated output images.
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// JSON file with pipeline settings; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// adaptive | global
    #[arg(long)]
    luminance_mode: Option<String>,

    /// otsu | kmeans
    #[arg(long)]
    chroma_mode: Option<String>,

    /// Confident-foreground percentile in (0, 1).
    #[arg(long)]
    percentile: Option<f64>,

    /// Minimum instance area in pixels.
    #[arg(long)]
    min_area: Option<usize>,

    /// Largest per-channel color step inside one pill (0-255).
    #[arg(long)]
    edge_threshold: Option<u8>,

    /// Also write the fused and instance masks.
    #[arg(long)]
    dump_masks: bool,

    /// Write a JSON report of every box to this path.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Worker count; defaults to the number of CPUs.
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Serialize)]
struct ImageReport {
    path: PathBuf,
    count: usize,
    boxes: Vec<BoxReport>,
}

#[derive(Serialize)]
struct BoxReport {
    #[serde(flatten)]
    bounding_box: BoundingBox,
    area: usize,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(mode) = &args.luminance_mode {
        config.luminance_mode = mode.parse()?;
    }
    if let Some(mode) = &args.chroma_mode {
        config.chroma_mode = mode.parse()?;
    }
    if let Some(percentile) = args.percentile {
        config.foreground_percentile = percentile;
    }
    if args.min_area.is_some() {
        config.min_area = args.min_area;
    }
    if let Some(threshold) = args.edge_threshold {
        config.edge_threshold = threshold;
    }
    config.validate()?;
    Ok(config)
}

fn output_path(output_dir: &Path, input: &Path, prefix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    output_dir.join(format!("{prefix}_{stem}.png"))
}

fn write_outputs(args: &Args, input: &Path, image: &image::RgbImage, segmentation: &Segmentation) -> Result<()> {
    let boxed = image_helper::draw_boxes(image, &segmentation.instances, image_helper::BOX_COLOR);
    let boxed_path = output_path(&args.output_dir, input, "boxed");
    image_helper::save_rgb(&boxed_path, &boxed)
        .with_context(|| format!("writing {}", boxed_path.display()))?;

    if args.dump_masks {
        let fused_path = output_path(&args.output_dir, input, "fused");
        image_helper::save_mask(&fused_path, &segmentation.fusion.fused_mask)
            .with_context(|| format!("writing {}", fused_path.display()))?;
        let instances_path = output_path(&args.output_dir, input, "instances");
        image_helper::save_mask(&instances_path, &segmentation.instance_mask)
            .with_context(|| format!("writing {}", instances_path.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    let config = load_config(&args)?;
    info!(
        "luminance={} chroma={} percentile={}",
        config.luminance_mode, config.chroma_mode, config.foreground_percentile
    );
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    // --- 2. Image Loading ---
    let mut images = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let image = image_helper::load_rgb(input).with_context(|| format!("loading {}", input.display()))?;
        images.push(image);
    }

    // --- 3. Segmentation ---
    let pipeline = match args.workers {
        Some(workers) => ParallelPipeline::with_workers(config, workers)?,
        None => ParallelPipeline::new(config)?,
    };
    let results = pipeline.process_batch(images).await;

    // --- 4. Output ---
    let mut reports = Vec::with_capacity(results.len());
    let mut failures = 0usize;
    for (input, result) in args.inputs.iter().zip(results) {
        match result {
            Ok(Segmented { image, segmentation }) => {
                write_outputs(&args, input, &image, &segmentation)?;
                println!("{}: {} pills", input.display(), segmentation.count());
                let boxes = match segmentation.report() {
                    Report::NoInstances => {
                        warn!("{}: nothing left after filtering", input.display());
                        Vec::new()
                    }
                    Report::Instances(instances) => instances
                        .into_iter()
                        .map(|i| BoxReport {
                            bounding_box: i.bounding_box,
                            area: i.area,
                        })
                        .collect(),
                };
                reports.push(ImageReport {
                    path: input.clone(),
                    count: boxes.len(),
                    boxes,
                });
            }
            Err(e) => {
                error!("{}: {e}", input.display());
                failures += 1;
            }
        }
    }

    if let Some(path) = &args.json {
        let text = serde_json::to_string_pretty(&reports)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    }

    if failures > 0 {
        anyhow::bail!("{failures} image(s) failed to segment");
    }
    Ok(())
}
