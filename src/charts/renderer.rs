//! Static Map Renderer
//! Generates a PNG choropleth with plotters.
//!
//! Layout:
//! 1. Title centered on top
//! 2. Map area: region polygons filled as triangles (holes stay open, so an
//!    enclave drawn earlier is never painted over) with thin outlines,
//!    equirectangular with a cos(latitude) aspect correction
//! 3. Legend column on the right: color swatches with value labels

use super::choropleth::{ChoroplethMap, MapBackend, RenderError};
use geo::{LineString, Polygon, TriangulateEarcut};
use plotters::prelude::*;
use std::path::PathBuf;
use tracing::info;

const LEGEND_WIDTH: u32 = 170;
const TITLE_HEIGHT: u32 = 50;
const MARGIN: u32 = 15;
const MIN_MAP_HEIGHT: u32 = 200;
const MAX_MAP_HEIGHT: u32 = 4000;
const LEGEND_STEPS: usize = 6;

const OUTLINE: RGBColor = RGBColor(60, 60, 60);

pub struct StaticMapRenderer {
    path: PathBuf,
    width: u32,
}

impl StaticMapRenderer {
    pub fn new(path: impl Into<PathBuf>, width: u32) -> Self {
        Self {
            path: path.into(),
            width,
        }
    }

    /// Image size for a map `width` pixels wide (legend included).
    pub fn image_size(map: &ChoroplethMap, width: u32) -> (u32, u32) {
        let map_width = width.saturating_sub(LEGEND_WIDTH).max(MIN_MAP_HEIGHT) as f64;
        let lon_span = map.bounds.width().max(1e-9);
        let lat_span = map.bounds.height().max(1e-9);
        let aspect = lat_span / (lon_span * mid_latitude_scale(map));

        let map_height = ((map_width * aspect) as u32).clamp(MIN_MAP_HEIGHT, MAX_MAP_HEIGHT);
        (width.max(LEGEND_WIDTH + MIN_MAP_HEIGHT), map_height + TITLE_HEIGHT + 2 * MARGIN)
    }

    fn draw(&self, map: &ChoroplethMap) -> Result<(), RenderError> {
        let (width, height) = Self::image_size(map, self.width);
        let root = BitMapBackend::new(&self.path, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(drawing)?;

        let root = root
            .titled(&map.title(), ("sans-serif", 24).into_font())
            .map_err(drawing)?;
        let (map_area, legend_area) = root.split_horizontally(width - LEGEND_WIDTH);

        Self::draw_regions(&map_area, map)?;
        Self::draw_legend(&legend_area, map)?;

        root.present().map_err(drawing)?;
        Ok(())
    }

    fn draw_regions<DB: DrawingBackend>(
        area: &DrawingArea<DB, plotters::coord::Shift>,
        map: &ChoroplethMap,
    ) -> Result<(), RenderError> {
        let (min, max) = (map.bounds.min(), map.bounds.max());
        let mut chart = ChartBuilder::on(area)
            .margin(MARGIN)
            .build_cartesian_2d(min.x..max.x, min.y..max.y)
            .map_err(drawing)?;

        let opacity = map.opacity.clamp(0.0, 1.0);

        for region in &map.regions {
            let [r, g, b] = map.fill(region);
            let fill = RGBColor(r, g, b).mix(opacity).filled();

            for polygon in &region.geometry.0 {
                chart
                    .draw_series(polygon.earcut_triangles_iter().map(|triangle| {
                        let points = triangle.to_array().map(|c| (c.x, c.y)).to_vec();
                        plotters::element::Polygon::new(points, fill)
                    }))
                    .map_err(drawing)?;
                chart
                    .draw_series(rings(polygon).map(|ring| {
                        PathElement::new(ring_points(ring), OUTLINE.stroke_width(1))
                    }))
                    .map_err(drawing)?;
            }
        }

        Ok(())
    }

    fn draw_legend<DB: DrawingBackend>(
        area: &DrawingArea<DB, plotters::coord::Shift>,
        map: &ChoroplethMap,
    ) -> Result<(), RenderError> {
        let label_style = TextStyle::from(("sans-serif", 14).into_font()).color(&BLACK);
        let header_style = TextStyle::from(("sans-serif", 16).into_font()).color(&BLACK);

        area.draw_text(&map.value_label, &header_style, (10, MARGIN as i32))
            .map_err(drawing)?;

        // Highest class on top
        let entries = map.mapper.legend(LEGEND_STEPS);
        let swatch = 22i32;
        let gap = 6i32;
        let top = MARGIN as i32 + 30;
        for (i, ([r, g, b], label)) in entries.iter().rev().enumerate() {
            let y = top + i as i32 * (swatch + gap);
            area.draw(&Rectangle::new(
                [(10, y), (10 + swatch, y + swatch)],
                RGBColor(*r, *g, *b).filled(),
            ))
            .map_err(drawing)?;
            area.draw(&Rectangle::new(
                [(10, y), (10 + swatch, y + swatch)],
                OUTLINE.stroke_width(1),
            ))
            .map_err(drawing)?;
            area.draw_text(label, &label_style, (10 + swatch + 8, y + 4))
                .map_err(drawing)?;
        }

        if map.regions.iter().any(|r| r.value.is_none()) {
            let [r, g, b] = super::colorscale::NO_DATA;
            let y = top + entries.len() as i32 * (swatch + gap) + gap;
            area.draw(&Rectangle::new(
                [(10, y), (10 + swatch, y + swatch)],
                RGBColor(r, g, b).filled(),
            ))
            .map_err(drawing)?;
            area.draw_text("No data", &label_style, (10 + swatch + 8, y + 4))
                .map_err(drawing)?;
        }

        Ok(())
    }
}

impl MapBackend for StaticMapRenderer {
    fn name(&self) -> &'static str {
        "static-png"
    }

    fn render(&self, map: &ChoroplethMap) -> Result<(), RenderError> {
        self.draw(map)?;
        info!(path = %self.path.display(), "wrote static map");
        Ok(())
    }
}

/// Horizontal shrink of a degree of longitude at the map's middle latitude.
fn mid_latitude_scale(map: &ChoroplethMap) -> f64 {
    let mid = (map.bounds.min().y + map.bounds.max().y) / 2.0;
    mid.to_radians().cos().max(0.1)
}

fn rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors())
}

fn ring_points(ring: &LineString<f64>) -> Vec<(f64, f64)> {
    ring.coords().map(|c| (c.x, c.y)).collect()
}

fn drawing<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Drawing(e.to_string())
}
