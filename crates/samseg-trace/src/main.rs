//! samseg-trace: turn a mask image into an annotation polygon.
//!
//! Runs the mask postprocessing chain (contours, longest boundary,
//! adaptive simplification) on a mask read from disk and prints the
//! result as a labelme shape. Useful for checking what polygon a decoded
//! mask would produce without running any model.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin samseg-trace -- [OPTIONS] <MASK_PATH>
//! ```
//!
//! Set `RUST_LOG=samseg_pipeline=trace` to see per-stage details.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};

use clap::Parser;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use samseg_export::{LabelmeDocument, SvgMetadata};
use samseg_pipeline::{Dimensions, Mask, ModelConfig, Point, Polygon};
use tracing_subscriber::EnvFilter;

/// Trace a binary mask image into a simplified annotation polygon.
#[derive(Parser)]
#[command(name = "samseg-trace", version)]
struct Cli {
    /// Mask image (PNG, JPEG, BMP, WebP). Luma above `--level` is foreground.
    mask_path: PathBuf,

    /// Foreground threshold on the mask's luma channel.
    #[arg(long, default_value_t = 127)]
    level: u8,

    /// Simplification divisor: tolerance is the outline's extent over this.
    #[arg(long, default_value_t = ModelConfig::DEFAULT_SIMPLIFY_DIVISOR)]
    divisor: f64,

    /// Full model config as a JSON string. Its `simplify_divisor`
    /// replaces `--divisor`.
    #[arg(long)]
    config_json: Option<String>,

    /// Label written into the labelme shape.
    #[arg(long, default_value = "object")]
    label: String,

    /// Prompt click as "X,Y", drawn on the SVG and overlay. Repeatable.
    #[arg(long = "prompt", value_name = "X,Y", value_parser = parse_point)]
    prompts: Vec<Point>,

    /// Print a complete labelme annotation file instead of a single shape.
    #[arg(long)]
    document: bool,

    /// Write an SVG overlay to this file.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Write a PNG with the polygon drawn over the image to this file.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Image to draw the overlay on. Defaults to the mask itself.
    #[arg(long)]
    image: Option<PathBuf>,
}

/// Parse `"X,Y"` into a [`Point`].
fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x in {s:?}: {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y in {s:?}: {e}"))?;
    Ok(Point::new(x, y))
}

/// Resolve the simplification divisor from `--config-json` or `--divisor`.
fn divisor_from_cli(cli: &Cli) -> Result<f64, String> {
    let config: ModelConfig = match cli.config_json {
        Some(ref json) => {
            serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
        }
        None => ModelConfig {
            simplify_divisor: cli.divisor,
            ..ModelConfig::default()
        },
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config.simplify_divisor)
}

/// Draw the polygon outline in green and prompts in red.
#[allow(clippy::cast_possible_truncation)]
fn draw_overlay(canvas: &mut RgbImage, polygon: &Polygon, prompts: &[Point]) {
    const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
    const PROMPT: Rgb<u8> = Rgb([255, 0, 0]);

    let points = polygon.points();
    for pair in points.windows(2) {
        draw_line_segment_mut(
            canvas,
            (pair[0].x as f32, pair[0].y as f32),
            (pair[1].x as f32, pair[1].y as f32),
            OUTLINE,
        );
    }
    for p in points {
        draw_filled_circle_mut(canvas, (p.x.round() as i32, p.y.round() as i32), 1, OUTLINE);
    }
    for p in prompts {
        draw_filled_circle_mut(canvas, (p.x.round() as i32, p.y.round() as i32), 3, PROMPT);
    }
}

fn title_of(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("mask")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let divisor = divisor_from_cli(&cli)?;

    tracing::info!(path = %cli.mask_path.display(), level = cli.level, divisor, "tracing mask");
    let gray = image::open(&cli.mask_path)?.into_luma8();
    let dimensions = Dimensions {
        width: gray.width(),
        height: gray.height(),
    };
    let mask = Mask::from_gray(&gray, cli.level);
    let polygon = samseg_pipeline::mask_to_polygon(&mask, divisor)?;
    tracing::info!(vertices = polygon.len(), "traced polygon");

    let shape = samseg_export::to_labelme_shape(&polygon, &cli.label)?;
    let json = if cli.document {
        let mut document = LabelmeDocument::new(
            cli.image
                .as_deref()
                .unwrap_or(&cli.mask_path)
                .to_string_lossy(),
            dimensions,
        );
        document.shapes.push(shape);
        serde_json::to_string_pretty(&document)?
    } else {
        serde_json::to_string_pretty(&shape)?
    };
    println!("{json}");

    if let Some(ref svg_path) = cli.svg {
        let description = format!("level={}, divisor={divisor}", cli.level);
        let metadata = SvgMetadata {
            title: Some(title_of(&cli.mask_path)),
            description: Some(&description),
            config_json: cli.config_json.as_deref(),
        };
        let svg = samseg_export::to_svg(&polygon, &cli.prompts, dimensions, &metadata);
        std::fs::write(svg_path, &svg)?;
        eprintln!("SVG written to {} ({} bytes)", svg_path.display(), svg.len());
    }

    if let Some(ref overlay_path) = cli.overlay {
        let mut canvas = match cli.image {
            Some(ref path) => image::open(path)?.into_rgb8(),
            None => image::DynamicImage::ImageLuma8(gray).into_rgb8(),
        };
        draw_overlay(&mut canvas, &polygon, &cli.prompts);
        canvas.save(overlay_path)?;
        eprintln!("Overlay written to {}", overlay_path.display());
    }

    Ok(())
}
