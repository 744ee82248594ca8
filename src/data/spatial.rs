//! Spatial Join Module
//! Assigns points to the region polygon containing them and aggregates values per region.

use super::frame::GeoFrame;
use geo::{BoundingRect, Contains, MultiPolygon, Point, Rect};
use polars::prelude::*;
use rayon::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Column holding the number of points aggregated into each region.
pub const POINT_COUNT_COLUMN: &str = "point_count";

#[derive(Error, Debug)]
pub enum SpatialError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Column '{column}' not found in {table} table")]
    MissingColumn { table: &'static str, column: String },
    #[error("None of the {0} points fall within a region")]
    NoPointsWithin(usize),
}

/// Per-region aggregation of point values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Mean,
    Median,
    Sum,
    Count,
}

impl Aggregation {
    fn expr(self, column: &str) -> Expr {
        match self {
            Aggregation::Mean => col(column).mean(),
            Aggregation::Median => col(column).median(),
            Aggregation::Sum => col(column).sum(),
            Aggregation::Count => col(column).count().cast(DataType::Float64),
        }
    }
}

/// Which point columns to use and how to aggregate them.
#[derive(Debug, Clone)]
pub struct PointSpec {
    pub longitude: String,
    pub latitude: String,
    pub value: String,
    pub aggregate: Aggregation,
}

/// Region polygon with a precomputed bounding box for cheap rejection.
struct IndexedRegion<'a> {
    row: usize,
    bounds: Rect<f64>,
    geometry: &'a MultiPolygon<f64>,
}

/// Spatially joins points to regions.
pub struct SpatialJoiner;

impl SpatialJoiner {
    /// Index of the region containing each point, or `None` when outside every region.
    ///
    /// Points on a boundary are not within it. Overlapping regions resolve to the first.
    pub fn assign(points: &[Option<Point<f64>>], regions: &GeoFrame) -> Vec<Option<usize>> {
        let index: Vec<IndexedRegion> = regions
            .geometries()
            .iter()
            .enumerate()
            .filter_map(|(row, geometry)| {
                let geometry = geometry.as_ref()?;
                Some(IndexedRegion {
                    row,
                    bounds: geometry.bounding_rect()?,
                    geometry,
                })
            })
            .collect();

        points
            .par_iter()
            .map(|point| {
                let point = (*point)?;
                index
                    .iter()
                    .filter(|region| within_bounds(&region.bounds, &point))
                    .find(|region| region.geometry.contains(&point))
                    .map(|region| region.row)
            })
            .collect()
    }

    /// Aggregate point values per region, keyed by the region's `region_key` column.
    ///
    /// Output columns: [region_key, value, "point_count"], sorted by key.
    pub fn aggregate(
        points: &DataFrame,
        regions: &GeoFrame,
        region_key: &str,
        spec: &PointSpec,
    ) -> Result<DataFrame, SpatialError> {
        let coords = Self::coordinates(points, spec)?;
        let values_column = points
            .column(&spec.value)
            .map_err(|_| missing("points", &spec.value))?
            .cast(&DataType::Float64)?;
        let values = values_column.f64()?;

        let keys_column = regions
            .frame()
            .column(region_key)
            .map_err(|_| missing("region", region_key))?
            .cast(&DataType::String)?;
        let keys = keys_column.str()?;

        let assignments = Self::assign(&coords, regions);

        let mut region_keys: Vec<Option<String>> = Vec::new();
        let mut point_values: Vec<Option<f64>> = Vec::new();
        for (i, assigned) in assignments.iter().enumerate() {
            if let Some(row) = assigned {
                region_keys.push(keys.get(*row).map(str::to_string));
                point_values.push(values.get(i).filter(|v| !v.is_nan()));
            }
        }

        let within = region_keys.len();
        if within == 0 {
            return Err(SpatialError::NoPointsWithin(points.height()));
        }
        if within < points.height() {
            warn!(
                outside = points.height() - within,
                total = points.height(),
                "points outside every region were dropped"
            );
        }

        let joined = DataFrame::new(vec![
            Column::new(region_key.into(), region_keys),
            Column::new(spec.value.as_str().into(), point_values),
        ])?;

        let aggregated = joined
            .lazy()
            .group_by([col(region_key)])
            .agg([
                spec.aggregate.expr(&spec.value).alias(spec.value.as_str()),
                col(spec.value.as_str()).count().alias(POINT_COUNT_COLUMN),
            ])
            .sort_by_exprs([col(region_key)], SortMultipleOptions::default())
            .collect()?;

        info!(
            points = points.height(),
            within,
            regions = aggregated.height(),
            aggregate = ?spec.aggregate,
            "aggregated points by region"
        );

        Ok(aggregated)
    }

    /// Longitude/latitude pairs; rows with a null or non-finite coordinate become `None`.
    fn coordinates(
        points: &DataFrame,
        spec: &PointSpec,
    ) -> Result<Vec<Option<Point<f64>>>, SpatialError> {
        let lon = points
            .column(&spec.longitude)
            .map_err(|_| missing("points", &spec.longitude))?
            .cast(&DataType::Float64)?;
        let lat = points
            .column(&spec.latitude)
            .map_err(|_| missing("points", &spec.latitude))?
            .cast(&DataType::Float64)?;

        Ok(lon
            .f64()?
            .into_iter()
            .zip(lat.f64()?.into_iter())
            .map(|(x, y)| match (x, y) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some(Point::new(x, y)),
                _ => None,
            })
            .collect())
    }
}

// Inclusive of the edges
fn within_bounds(rect: &Rect<f64>, point: &Point<f64>) -> bool {
    let (x, y) = (point.x(), point.y());
    x >= rect.min().x && x <= rect.max().x && y >= rect.min().y && y <= rect.max().y
}

fn missing(table: &'static str, column: &str) -> SpatialError {
    SpatialError::MissingColumn {
        table,
        column: column.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::GEOMETRY_COLUMN;
    use geo::polygon;

    fn regions() -> GeoFrame {
        let df = df!("REGION" => ["West", "East"]).unwrap();
        let west = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ]]);
        // L-shaped, so its bounding box covers points it does not contain
        let east = MultiPolygon::new(vec![polygon![
            (x: 3.0, y: 0.0),
            (x: 6.0, y: 0.0),
            (x: 6.0, y: 1.0),
            (x: 4.0, y: 1.0),
            (x: 4.0, y: 3.0),
            (x: 3.0, y: 3.0),
        ]]);
        GeoFrame::new(df, GEOMETRY_COLUMN, vec![Some(west), Some(east)]).unwrap()
    }

    fn spec(aggregate: Aggregation) -> PointSpec {
        PointSpec {
            longitude: "lon".to_string(),
            latitude: "lat".to_string(),
            value: "values".to_string(),
            aggregate,
        }
    }

    #[test]
    fn assigns_points_within_polygons() {
        let points = vec![
            Some(Point::new(1.0, 1.0)),
            Some(Point::new(3.5, 2.5)),
            Some(Point::new(5.0, 2.0)),
            Some(Point::new(2.0, 1.0)),
            None,
        ];

        let assigned = SpatialJoiner::assign(&points, &regions());
        assert_eq!(assigned, vec![Some(0), Some(1), None, None, None]);
    }

    #[test]
    fn aggregates_mean_per_region_and_drops_outside_points() {
        let points = df!(
            "lon" => [0.5, 1.5, 3.5, 5.0, 10.0],
            "lat" => [0.5, 1.5, 0.5, 0.5, 10.0],
            "values" => [10.0, 20.0, 7.0, 9.0, 1000.0]
        )
        .unwrap();

        let stats =
            SpatialJoiner::aggregate(&points, &regions(), "REGION", &spec(Aggregation::Mean))
                .unwrap();

        assert_eq!(stats.height(), 2);
        let keys: Vec<Option<&str>> = stats.column("REGION").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(keys, vec![Some("East"), Some("West")]);

        let means: Vec<Option<f64>> = stats.column("values").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(means, vec![Some(8.0), Some(15.0)]);

        let counts = stats
            .column(POINT_COUNT_COLUMN)
            .unwrap()
            .cast(&DataType::UInt32)
            .unwrap();
        let counts: Vec<Option<u32>> = counts.u32().unwrap().into_iter().collect();
        assert_eq!(counts, vec![Some(2), Some(2)]);
    }

    #[test]
    fn sum_aggregation() {
        let points = df!(
            "lon" => [0.5, 1.5],
            "lat" => [0.5, 1.5],
            "values" => [10.0, 20.0]
        )
        .unwrap();

        let stats =
            SpatialJoiner::aggregate(&points, &regions(), "REGION", &spec(Aggregation::Sum))
                .unwrap();
        let sums: Vec<Option<f64>> = stats.column("values").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(sums, vec![Some(30.0)]);
    }

    #[test]
    fn no_points_within_is_an_error() {
        let points = df!("lon" => [50.0], "lat" => [50.0], "values" => [1.0]).unwrap();

        let err = SpatialJoiner::aggregate(&points, &regions(), "REGION", &spec(Aggregation::Mean))
            .unwrap_err();
        assert!(matches!(err, SpatialError::NoPointsWithin(1)));
    }

    #[test]
    fn missing_coordinate_column_is_named() {
        let points = df!("x" => [0.5], "lat" => [0.5], "values" => [1.0]).unwrap();

        let err = SpatialJoiner::aggregate(&points, &regions(), "REGION", &spec(Aggregation::Mean))
            .unwrap_err();
        assert!(err.to_string().contains("'lon'"));
    }
}
