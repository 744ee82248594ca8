//! Choropleth Module
//! Validates a merged GeoFrame and turns it into a backend-independent map.

use super::colorscale::{Classification, ColorMapper, ColorScale};
use crate::data::{bounds_of, is_numeric, DataLoader, GeoFrame};
use geo::{MultiPolygon, Rect};
use polars::prelude::*;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Web-mercator zoom bounds.
const MIN_ZOOM: f64 = 0.0;
const MAX_ZOOM: f64 = 18.0;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Column '{0}' not found in merged table")]
    MissingColumn(String),
    #[error("Column '{column}' has type {dtype}; a numeric column is required to color by")]
    NonNumericColumn { column: String, dtype: String },
    #[error("No rows with geometry to draw")]
    NoGeometry,
    #[error("Column '{0}' has no finite values to color by")]
    NoValues(String),
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize map: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Drawing failed: {0}")]
    Drawing(String),
    #[error("Viewer failed: {0}")]
    Viewer(String),
}

/// Styling applied to the map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapStyle {
    pub zoom: Option<f64>,
    /// [longitude, latitude]
    pub center: Option<[f64; 2]>,
    pub color_scale: ColorScale,
    pub classification: Classification,
    pub opacity: f64,
    /// Basemap style name for tile-based backends
    pub basemap: String,
    pub title: Option<String>,
}

impl Default for MapStyle {
    fn default() -> Self {
        Self {
            zoom: None,
            center: None,
            color_scale: ColorScale::default(),
            classification: Classification::default(),
            opacity: 0.7,
            basemap: "light".to_string(),
            title: None,
        }
    }
}

/// Which columns to draw and how.
#[derive(Debug, Clone)]
pub struct ChoroplethSpec {
    pub geometry_column: String,
    pub value_column: String,
    pub id_column: String,
    pub style: MapStyle,
}

/// One drawable region.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRegion {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
    pub value: Option<f64>,
}

/// A renderable choropleth map.
#[derive(Debug, Clone)]
pub struct ChoroplethMap {
    pub regions: Vec<MapRegion>,
    pub mapper: ColorMapper,
    pub value_label: String,
    pub bounds: Rect<f64>,
    /// [longitude, latitude]
    pub center: [f64; 2],
    pub zoom: f64,
    pub opacity: f64,
    pub basemap: String,
    pub title: Option<String>,
}

impl ChoroplethMap {
    pub fn fill(&self, region: &MapRegion) -> [u8; 3] {
        self.mapper.color_for(region.value)
    }

    /// Refit the color mapping with another scale or classification.
    pub fn restyle(&mut self, scale: ColorScale, classification: Classification) {
        let values: Vec<f64> = self.regions.iter().filter_map(|r| r.value).collect();
        if let Some(mapper) = ColorMapper::fit(&values, scale, classification) {
            self.mapper = mapper;
        }
    }

    pub fn title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("{} by region", self.value_label))
    }
}

/// Turns a rendered map into an artifact.
pub trait MapBackend {
    fn name(&self) -> &'static str;

    fn render(&self, map: &ChoroplethMap) -> Result<(), RenderError>;
}

/// Builds choropleth maps from merged tables.
pub struct ChoroplethBuilder;

impl ChoroplethBuilder {
    pub fn build(frame: &GeoFrame, spec: &ChoroplethSpec) -> Result<ChoroplethMap, RenderError> {
        if spec.geometry_column != frame.geometry_name() {
            return Err(RenderError::MissingColumn(spec.geometry_column.clone()));
        }

        let df = frame.frame();
        let value_column = df.column(&spec.value_column).map_err(|_| {
            debug!(numeric = ?DataLoader::numeric_columns(df), "value column not found");
            RenderError::MissingColumn(spec.value_column.clone())
        })?;
        if !is_numeric(value_column.dtype()) {
            return Err(RenderError::NonNumericColumn {
                column: spec.value_column.clone(),
                dtype: value_column.dtype().to_string(),
            });
        }
        let id_column = df
            .column(&spec.id_column)
            .map_err(|_| RenderError::MissingColumn(spec.id_column.clone()))?;

        let values = value_column.cast(&DataType::Float64)?;
        let ids = id_column.cast(&DataType::String)?;

        let mut regions = Vec::with_capacity(frame.height());
        let mut skipped = 0usize;
        for ((id, value), geometry) in ids
            .str()?
            .into_iter()
            .zip(values.f64()?.into_iter())
            .zip(frame.geometries())
        {
            let Some(geometry) = geometry else {
                skipped += 1;
                continue;
            };
            regions.push(MapRegion {
                id: id.unwrap_or_default().to_string(),
                geometry: geometry.clone(),
                value: value.filter(|v| v.is_finite()),
            });
        }

        if skipped > 0 {
            warn!(skipped, "rows without geometry are not drawn");
        }
        if regions.is_empty() {
            return Err(RenderError::NoGeometry);
        }

        let finite: Vec<f64> = regions.iter().filter_map(|r| r.value).collect();
        let mapper = ColorMapper::fit(&finite, spec.style.color_scale, spec.style.classification)
            .ok_or_else(|| RenderError::NoValues(spec.value_column.clone()))?;

        let bounds = bounds_of(regions.iter().map(|r| &r.geometry)).ok_or(RenderError::NoGeometry)?;
        let center = spec
            .style
            .center
            .unwrap_or_else(|| [bounds.center().x, bounds.center().y]);
        let zoom = spec.style.zoom.unwrap_or_else(|| auto_zoom(&bounds));

        debug!(
            regions = regions.len(),
            min = mapper.min,
            max = mapper.max,
            zoom,
            "built choropleth"
        );

        Ok(ChoroplethMap {
            regions,
            mapper,
            value_label: spec.value_column.clone(),
            bounds,
            center,
            zoom,
            opacity: spec.style.opacity,
            basemap: spec.style.basemap.clone(),
            title: spec.style.title.clone(),
        })
    }
}

/// Zoom level at which the bounds roughly fill a 512px tile viewport.
pub fn auto_zoom(bounds: &Rect<f64>) -> f64 {
    let lon_span = bounds.width().max(1e-6);
    let lat_span = bounds.height().max(1e-6);
    let zoom = (360.0 / lon_span).log2().min((180.0 / lat_span).log2()) - 0.5;
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}
