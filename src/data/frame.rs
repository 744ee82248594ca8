//! GeoFrame Module
//! A polars DataFrame paired with one optional boundary geometry per row.

use geo::{BoundingRect, MultiPolygon, Rect};
use geojson::{Feature, FeatureCollection};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Default name of the geometry column.
pub const GEOMETRY_COLUMN: &str = "geometry";

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Attribute table has {rows} rows but {geometries} geometries were supplied")]
    LengthMismatch { rows: usize, geometries: usize },
    #[error("Geometry column '{0}' collides with an attribute column")]
    NameCollision(String),
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Attribute table plus a named geometry column.
#[derive(Debug, Clone)]
pub struct GeoFrame {
    frame: DataFrame,
    geometry_name: String,
    geometries: Vec<Option<MultiPolygon<f64>>>,
}

impl GeoFrame {
    pub fn new(
        frame: DataFrame,
        geometry_name: &str,
        geometries: Vec<Option<MultiPolygon<f64>>>,
    ) -> Result<Self, FrameError> {
        if frame.height() != geometries.len() {
            return Err(FrameError::LengthMismatch {
                rows: frame.height(),
                geometries: geometries.len(),
            });
        }
        if frame.column(geometry_name).is_ok() {
            return Err(FrameError::NameCollision(geometry_name.to_string()));
        }

        Ok(Self {
            frame,
            geometry_name: geometry_name.to_string(),
            geometries,
        })
    }

    /// Attribute columns.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn geometry_name(&self) -> &str {
        &self.geometry_name
    }

    pub fn geometries(&self) -> &[Option<MultiPolygon<f64>>] {
        &self.geometries
    }

    pub fn geometry(&self, row: usize) -> Option<&MultiPolygon<f64>> {
        self.geometries.get(row).and_then(|g| g.as_ref())
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Number of rows carrying a geometry.
    pub fn geometry_count(&self) -> usize {
        self.geometries.iter().filter(|g| g.is_some()).count()
    }

    /// Bounding box over every non-null geometry.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        bounds_of(self.geometries.iter().flatten())
    }

    /// Convert to a GeoJSON FeatureCollection with every attribute as a property.
    pub fn to_feature_collection(&self) -> PolarsResult<FeatureCollection> {
        let columns = self.frame.get_columns();
        let mut features = Vec::with_capacity(self.height());

        for (row, geometry) in self.geometries.iter().enumerate() {
            let mut properties = Map::new();
            for column in columns {
                let value = column.get(row)?;
                properties.insert(column.name().to_string(), any_value_to_json(&value));
            }

            features.push(Feature {
                bbox: None,
                geometry: geometry
                    .as_ref()
                    .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }

        Ok(features.into_iter().collect())
    }

    /// Write the table as a GeoJSON FeatureCollection.
    pub fn write_geojson(&self, path: &Path) -> Result<(), FrameError> {
        let collection = self.to_feature_collection()?;
        std::fs::write(path, collection.to_string()).map_err(|source| FrameError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), features = self.height(), "wrote merged GeoJSON");
        Ok(())
    }
}

/// Bounding box over a set of multipolygons.
pub fn bounds_of<'a>(geometries: impl Iterator<Item = &'a MultiPolygon<f64>>) -> Option<Rect<f64>> {
    geometries
        .filter_map(|g| g.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
            )
        })
}

fn any_value_to_json(value: &AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(v) => Value::from(*v),
        AnyValue::Int16(v) => Value::from(*v),
        AnyValue::Int32(v) => Value::from(*v),
        AnyValue::Int64(v) => Value::from(*v),
        AnyValue::UInt8(v) => Value::from(*v),
        AnyValue::UInt16(v) => Value::from(*v),
        AnyValue::UInt32(v) => Value::from(*v),
        AnyValue::UInt64(v) => Value::from(*v),
        AnyValue::Float32(v) => float_to_json(*v as f64),
        AnyValue::Float64(v) => float_to_json(*v),
        other => Value::String(other.to_string().trim_matches('"').to_string()),
    }
}

// JSON has no NaN or infinity
fn float_to_json(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
