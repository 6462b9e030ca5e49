//! Reference adjacency-cache builder.
//!
//! Reads a WKT polygon file (one POLYGON or MULTIPOLYGON per line, WGS84
//! lon/lat), builds the full visibility-graph hierarchy, computes the
//! level-0 adjacency, and writes it to a `.hvg_adj` cache for the
//! simulator to load at startup.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::builder::styling::Styles;
use clap::{ColorChoice, Parser, command};
use clap_cargo::style::{ERROR, HEADER, INVALID, LITERAL, PLACEHOLDER, USAGE, VALID};
use geo_types::Geometry;
use searoute::{Degrees, GeoPoint, Hierarchy, Polygon};
use tracing::{Level, debug, warn};
use tracing_subscriber::EnvFilter;
use wkt::TryFromWkt;

pub const CLAP_STYLING: Styles = Styles::styled()
    .header(HEADER)
    .usage(USAGE)
    .literal(LITERAL)
    .placeholder(PLACEHOLDER)
    .error(ERROR)
    .valid(VALID)
    .invalid(INVALID);

#[derive(Parser)]
#[command(name = "searoute-builder", version, about, color = ColorChoice::Auto, styles = CLAP_STYLING)]
struct Args {
    /// WKT polygon file: one POLYGON or MULTIPOLYGON per line, WGS84
    /// longitude/latitude coordinates
    polygons: PathBuf,

    /// Output path for the adjacency cache; defaults to the input path
    /// with a .hvg_adj extension
    output: Option<PathBuf>,

    /// Configure diagnostic logging level
    #[clap(long, default_value_t = Level::ERROR)]
    log: Level,
}

fn load_polygons(path: &PathBuf) -> Result<Vec<Polygon>> {
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );

    let mut polygons = Vec::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let geometry: Geometry<f64> = Geometry::try_from_wkt_str(trimmed)
            .map_err(|e| anyhow::anyhow!("line {}: {e}", line_number + 1))?;
        match geometry {
            Geometry::Polygon(p) => polygons.push(convert_polygon(&p)?),
            Geometry::MultiPolygon(mp) => {
                for p in &mp.0 {
                    polygons.push(convert_polygon(p)?);
                }
            }
            _ => warn!(line = line_number + 1, "skipping non-polygon geometry"),
        }
    }
    Ok(polygons)
}

fn convert_polygon(source: &geo_types::Polygon<f64>) -> Result<Polygon> {
    let ring = |line: &geo_types::LineString<f64>| -> Vec<GeoPoint> {
        line.points()
            .map(|p| GeoPoint::new(Degrees(p.x()), Degrees(p.y())))
            .collect()
    };
    let outer = ring(source.exterior());
    let holes = source.interiors().iter().map(|h| ring(h)).collect();
    Polygon::new(outer, holes).context("invalid polygon ring")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(args.log.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let output = args.output.clone().unwrap_or_else(|| {
        let mut path = args.polygons.clone();
        path.set_extension("hvg_adj");
        path
    });

    println!("searoute-builder - adjacency cache builder");
    println!("================================================");
    println!("Polygons: {}", args.polygons.display());
    println!("Output:   {}\n", output.display());

    println!("[1/4] Loading polygons...");
    let began = Instant::now();
    let polygons = load_polygons(&args.polygons)?;
    if polygons.is_empty() {
        bail!("no polygons loaded from {}", args.polygons.display());
    }
    let load_time = began.elapsed().as_secs_f64();
    println!("      Loaded {} polygons in {load_time:.2}s\n", polygons.len());

    println!("[2/4] Building visibility-graph hierarchy (levels 0-3)...");
    let began = Instant::now();
    let mut hierarchy = Hierarchy::new(polygons);
    let build_time = began.elapsed().as_secs_f64();
    println!("      Hierarchy built in {build_time:.2}s\n");

    println!("[3/4] Building level-0 adjacency (this may take a while)...");
    let began = Instant::now();
    hierarchy.build_level0_adjacency();
    let adjacency_time = began.elapsed().as_secs_f64();
    println!("      Level-0 adjacency built in {adjacency_time:.2}s\n");

    println!("[4/4] Saving adjacency cache...");
    let began = Instant::now();
    hierarchy
        .save_adjacency_cache(&output)
        .with_context(|| format!("saving {}", output.display()))?;
    let save_time = began.elapsed().as_secs_f64();
    println!("      Saved in {save_time:.2}s\n");

    let size_mb = std::fs::metadata(&output)?.len() as f64 / (1024.0 * 1024.0);
    debug!(path = %output.display(), size_mb, "cache written");

    let total = load_time + build_time + adjacency_time + save_time;
    println!("================================================");
    println!("Summary:");
    println!("  Vertices:   {}", hierarchy.level(0).vertices().len());
    println!("  File size:  {size_mb:.2} MB");
    println!("  Total time: {total:.2}s");
    println!("  Output:     {}", output.display());
    println!("================================================");
    println!("Done.");

    Ok(())
}
