//! roi_tool - inspect and edit the persisted ROI configuration
//!
//! Edits go through the same state machine the interactive editor uses, so a
//! file written here loads exactly like one drawn on screen.

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crowd_sentinel::geometry::Point;
use crowd_sentinel::roi::{
    EditState, InputKey, LoadOutcome, PointerEvent, RoiRegistry, DEFAULT_ROI_CONFIG_PATH,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// ROI configuration file.
    #[arg(long, env = "SENTINEL_ROI_CONFIG", default_value = DEFAULT_ROI_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every ROI with its threshold.
    List,
    /// Append a polygon, e.g. `add --point 10,10 --point 200,10 --point 200,150 --threshold 12`.
    Add {
        #[arg(long = "point", value_parser = parse_point, required = true)]
        points: Vec<Point>,
        /// Overflow threshold; empty or invalid falls back to the default.
        #[arg(long, default_value = "")]
        threshold: String,
    },
    /// Move one vertex of an ROI (1-based indices).
    MoveVertex {
        #[arg(long)]
        roi: usize,
        #[arg(long)]
        vertex: usize,
        #[arg(long, value_parser = parse_point)]
        to: Point,
    },
    /// Remove every ROI.
    Clear,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut registry = RoiRegistry::new();
    let outcome = registry.load(&args.config)?;

    match args.command {
        Command::List => {
            if outcome == LoadOutcome::Missing {
                println!("no ROI file at {}", args.config.display());
                return Ok(());
            }
            for (i, roi) in registry.rois().iter().enumerate() {
                let points: Vec<String> = roi
                    .polygon
                    .iter()
                    .map(|p| format!("({},{})", p.x, p.y))
                    .collect();
                println!("ROI #{} threshold={} points={}", i + 1, roi.threshold, points.join(" "));
            }
            return Ok(());
        }
        Command::Add { points, threshold } => add_polygon(&mut registry, &points, &threshold)?,
        Command::MoveVertex { roi, vertex, to } => move_vertex(&mut registry, roi, vertex, to)?,
        Command::Clear => {
            registry.set_edit_mode(true);
            if !registry.clear() {
                bail!("registry refused to clear");
            }
        }
    }

    registry.save(&args.config)?;
    println!(
        "saved {} ROI(s) to {}",
        registry.len(),
        args.config.display()
    );
    Ok(())
}

fn add_polygon(registry: &mut RoiRegistry, points: &[Point], threshold: &str) -> Result<()> {
    if points.len() < 3 {
        bail!("an ROI needs at least three points");
    }
    registry.set_edit_mode(true);
    let before = registry.len();
    for &p in points {
        registry.handle_pointer(PointerEvent::PrimaryDown(p));
        registry.handle_pointer(PointerEvent::PrimaryUp(p));
    }
    let drawn = match registry.state() {
        EditState::Drawing { points } => points.len(),
        _ => 0,
    };
    if drawn != points.len() || !registry.close_polygon() {
        bail!("first point is within grab range of an existing vertex; pick another start point");
    }
    for c in threshold.chars() {
        registry.handle_input_key(InputKey::Char(c));
    }
    registry.handle_input_key(InputKey::Enter);
    if registry.len() != before + 1 {
        bail!("polygon was not committed");
    }
    Ok(())
}

fn move_vertex(registry: &mut RoiRegistry, roi: usize, vertex: usize, to: Point) -> Result<()> {
    let from = registry
        .rois()
        .get(roi.wrapping_sub(1))
        .and_then(|r| r.polygon.get(vertex.wrapping_sub(1)))
        .copied()
        .ok_or_else(|| anyhow!("no vertex {} on ROI #{}", vertex, roi))?;

    registry.set_edit_mode(true);
    registry.handle_pointer(PointerEvent::PrimaryDown(from));
    if !registry.is_dragging() {
        bail!("could not grab vertex {} of ROI #{}", vertex, roi);
    }
    registry.handle_pointer(PointerEvent::Move(to));
    registry.handle_pointer(PointerEvent::PrimaryUp(to));

    let moved = registry.rois()[roi - 1].polygon[vertex - 1];
    if moved != to {
        bail!("another vertex within grab range of ({}, {}) was moved instead", from.x, from.y);
    }
    Ok(())
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
    let x = x.trim().parse().map_err(|_| format!("invalid x in '{}'", s))?;
    let y = y.trim().parse().map_err(|_| format!("invalid y in '{}'", s))?;
    Ok(Point::new(x, y))
}
