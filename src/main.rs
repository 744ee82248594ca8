//! GeoChart - region statistics as choropleth maps
//!
//! Loads region boundaries, merges them with a statistics table (or with
//! point data aggregated per region) and renders the result as an HTML map,
//! a PNG, a GeoJSON file or an interactive window.

mod charts;
mod config;
mod data;
mod gui;
mod logging;

use anyhow::{Context, Result};
use charts::{ChoroplethBuilder, MapBackend, PlotlyHtmlRenderer, StaticMapRenderer};
use clap::{ArgAction, Parser};
use config::Settings;
use data::{DataLoader, GeoFrame, Merger, RegionLoader, SpatialJoiner};
use gui::InteractiveViewer;
use polars::prelude::DataFrame;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "geochart")]
#[command(about = "Merge region boundaries with statistics and render a choropleth map")]
#[command(version)]
pub struct Cli {
    /// Region boundaries (.shp or .geojson)
    regions: Option<PathBuf>,
    /// Statistics keyed by region (.csv or .json)
    statistics: Option<PathBuf>,
    /// Point dataset aggregated per region instead of a statistics table
    #[arg(long, conflicts_with = "statistics")]
    points: Option<PathBuf>,
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write an interactive HTML map
    #[arg(long)]
    html: Option<PathBuf>,
    /// Write a static PNG map
    #[arg(long)]
    png: Option<PathBuf>,
    /// Write the merged table as GeoJSON
    #[arg(long)]
    geojson: Option<PathBuf>,
    /// Open the map in a native viewer window
    #[arg(long)]
    view: bool,
    /// Open the HTML map in the default browser
    #[arg(long)]
    open: bool,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let settings = Settings::resolve(&cli).context("Failed to load configuration")?;
    run(&settings)
}

fn run(settings: &Settings) -> Result<()> {
    let regions_path = settings
        .data
        .regions
        .as_deref()
        .context("No region boundary file given")?;
    let regions = RegionLoader::load(regions_path, &settings.region_options())
        .with_context(|| format!("Failed to load regions from {}", regions_path.display()))?;

    let statistics = load_statistics(settings, &regions)?;

    let merged = Merger::merge(&statistics, &regions, &settings.join_spec())
        .context("Failed to merge statistics with regions")?;
    info!(rows = merged.height(), "merged");

    if let Some(path) = &settings.output.geojson {
        merged
            .write_geojson(path)
            .with_context(|| format!("Failed to export {}", path.display()))?;
    }

    let map = ChoroplethBuilder::build(&merged, &settings.choropleth_spec())
        .context("Failed to build choropleth")?;
    let mapbox_token = settings.mapbox_token()?;

    let mut backends: Vec<Box<dyn MapBackend>> = Vec::new();
    if let Some(path) = &settings.output.html {
        backends.push(Box::new(PlotlyHtmlRenderer::new(path, mapbox_token.clone())));
    }
    if let Some(path) = &settings.output.png {
        backends.push(Box::new(StaticMapRenderer::new(path, settings.output.width)));
    }
    for backend in &backends {
        backend
            .render(&map)
            .with_context(|| format!("Failed to render {}", backend.name()))?;
    }

    println!("\n🗺  {}", map.title());
    println!("   Regions drawn: {}", map.regions.len());
    println!(
        "   Without data:  {}",
        map.regions.iter().filter(|r| r.value.is_none()).count()
    );
    for path in [
        &settings.output.html,
        &settings.output.png,
        &settings.output.geojson,
    ]
    .into_iter()
    .flatten()
    {
        println!("   Wrote:         {}", path.display());
    }

    if settings.output.open {
        if let Some(path) = &settings.output.html {
            open::that(path).with_context(|| format!("Failed to open {}", path.display()))?;
        }
    }

    if settings.output.view {
        let viewer = InteractiveViewer {
            png_width: settings.output.width,
            mapbox_token,
        };
        viewer.render(&map).context("Viewer failed")?;
    }

    Ok(())
}

/// The statistics table, either loaded directly or aggregated from points.
fn load_statistics(settings: &Settings, regions: &GeoFrame) -> Result<DataFrame> {
    let options = settings.table_options()?;

    if let Some((path, spec)) = settings.point_spec() {
        let points = DataLoader::load_table(path, &options)
            .with_context(|| format!("Failed to load points from {}", path.display()))?;
        let aggregated =
            SpatialJoiner::aggregate(&points, regions, &settings.data.region_key, &spec)
                .context("Failed to assign points to regions")?;
        return Ok(aggregated);
    }

    let path = settings
        .data
        .statistics
        .as_deref()
        .context("No statistics table given")?;
    DataLoader::load_table(path, &options)
        .with_context(|| format!("Failed to load statistics from {}", path.display()))
}
