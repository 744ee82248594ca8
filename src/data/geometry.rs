//! Region Geometry Loader Module
//! Reads region boundaries with their attributes from shapefiles or GeoJSON.

use super::frame::{GeoFrame, GEOMETRY_COLUMN};
use super::loader::{extension, LoaderError};
use geo::{CoordsIter, Geometry, MultiPolygon};
use geojson::FeatureCollection;
use polars::prelude::*;
use serde_json::Value;
use shapefile::dbase::{self, FieldValue};
use shapefile::Shape;
use std::path::Path;
use tracing::{info, warn};

/// Options for reading a region boundary file.
#[derive(Debug, Clone)]
pub struct RegionOptions {
    pub geometry_column: String,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self {
            geometry_column: GEOMETRY_COLUMN.to_string(),
        }
    }
}

/// A single attribute cell before the column type is known.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Number(f64),
    Text(String),
}

/// Loads region boundaries into a GeoFrame.
pub struct RegionLoader;

impl RegionLoader {
    pub fn load(path: &Path, options: &RegionOptions) -> Result<GeoFrame, LoaderError> {
        if !path.is_file() {
            return Err(LoaderError::NotFound(path.to_path_buf()));
        }

        let frame = match extension(path).as_deref() {
            Some("shp") => Self::load_shapefile(path, options)?,
            Some("geojson" | "json") => Self::load_geojson(path, options)?,
            _ => return Err(LoaderError::UnsupportedFormat(path.to_path_buf())),
        };

        if frame.height() == 0 {
            return Err(LoaderError::Empty(path.to_path_buf()));
        }

        info!(
            path = %path.display(),
            regions = frame.height(),
            with_geometry = frame.geometry_count(),
            "loaded regions"
        );

        Ok(frame)
    }

    /// Read `.shp` shapes and the sibling `.dbf` attribute table.
    fn load_shapefile(path: &Path, options: &RegionOptions) -> Result<GeoFrame, LoaderError> {
        let shapes = shapefile::read_shapes(path)?;

        let dbf_path = path.with_extension("dbf");
        if !dbf_path.is_file() {
            return Err(LoaderError::NotFound(dbf_path));
        }
        let mut reader = dbase::Reader::from_path(&dbf_path)?;
        let field_names: Vec<String> = reader
            .fields()
            .iter()
            .map(|field| field.name().to_string())
            .collect();
        let records = reader.read()?;

        if shapes.len() != records.len() {
            return Err(LoaderError::RecordCountMismatch {
                shapes: shapes.len(),
                records: records.len(),
            });
        }

        check_projection(path);

        let columns: Vec<(String, Vec<Cell>)> = field_names
            .into_iter()
            .map(|name| {
                let cells = records
                    .iter()
                    .map(|record| record.get(&name).map(field_to_cell).unwrap_or(Cell::Null))
                    .collect();
                (name, cells)
            })
            .collect();

        let geometries = shapes
            .into_iter()
            .enumerate()
            .map(|(row, shape)| shape_to_multipolygon(shape, row))
            .collect::<Result<Vec<_>, _>>()?;

        let df = build_frame(columns)?;
        Ok(GeoFrame::new(df, &options.geometry_column, geometries)?)
    }

    /// Read a GeoJSON FeatureCollection.
    fn load_geojson(path: &Path, options: &RegionOptions) -> Result<GeoFrame, LoaderError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let collection: FeatureCollection = text.parse()?;

        // Property names in first-seen order
        let mut names: Vec<String> = Vec::new();
        for feature in &collection.features {
            if let Some(properties) = &feature.properties {
                for key in properties.keys() {
                    if !names.contains(key) {
                        names.push(key.clone());
                    }
                }
            }
        }

        let columns: Vec<(String, Vec<Cell>)> = names
            .into_iter()
            .map(|name| {
                let cells = collection
                    .features
                    .iter()
                    .map(|feature| {
                        feature
                            .property(&name)
                            .map(json_to_cell)
                            .unwrap_or(Cell::Null)
                    })
                    .collect();
                (name, cells)
            })
            .collect();

        let geometries = collection
            .features
            .into_iter()
            .enumerate()
            .map(|(row, feature)| match feature.geometry {
                Some(geometry) => {
                    let geometry = Geometry::<f64>::try_from(geometry.value).map_err(|e| {
                        LoaderError::MalformedGeometry {
                            row,
                            reason: e.to_string(),
                        }
                    })?;
                    into_multipolygon(geometry, row).map(Some)
                }
                None => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let df = build_frame(columns)?;
        Ok(GeoFrame::new(df, &options.geometry_column, geometries)?)
    }
}

fn shape_to_multipolygon(shape: Shape, row: usize) -> Result<Option<MultiPolygon<f64>>, LoaderError> {
    if matches!(shape, Shape::NullShape) {
        return Ok(None);
    }

    let geometry = Geometry::<f64>::try_from(shape).map_err(|e| LoaderError::MalformedGeometry {
        row,
        reason: e.to_string(),
    })?;
    into_multipolygon(geometry, row).map(Some)
}

/// Accept polygons and multipolygons with finite coordinates.
fn into_multipolygon(geometry: Geometry<f64>, row: usize) -> Result<MultiPolygon<f64>, LoaderError> {
    let multipolygon = match geometry {
        Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
        Geometry::MultiPolygon(multipolygon) => multipolygon,
        other => {
            return Err(LoaderError::MalformedGeometry {
                row,
                reason: format!("expected a polygon boundary, found {}", geometry_kind(&other)),
            })
        }
    };

    if multipolygon.0.is_empty() {
        return Err(LoaderError::MalformedGeometry {
            row,
            reason: "polygon has no rings".to_string(),
        });
    }
    if multipolygon
        .coords_iter()
        .any(|c| !c.x.is_finite() || !c.y.is_finite())
    {
        return Err(LoaderError::MalformedGeometry {
            row,
            reason: "non-finite coordinate".to_string(),
        });
    }

    Ok(multipolygon)
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

fn field_to_cell(value: &FieldValue) -> Cell {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => Cell::Text(s.trim().to_string()),
        FieldValue::Numeric(Some(v)) | FieldValue::Double(v) | FieldValue::Currency(v) => {
            Cell::Number(*v)
        }
        FieldValue::Float(Some(v)) => Cell::Number(*v as f64),
        FieldValue::Integer(v) => Cell::Number(*v as f64),
        FieldValue::Logical(Some(b)) => Cell::Text(b.to_string()),
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => Cell::Null,
        other => Cell::Text(format!("{:?}", other)),
    }
}

fn json_to_cell(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Null),
        Value::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

/// Build a DataFrame, typing a column as Float64 only when every non-null cell is a number.
fn build_frame(columns: Vec<(String, Vec<Cell>)>) -> PolarsResult<DataFrame> {
    let columns = columns
        .into_iter()
        .map(|(name, cells)| {
            let all_numeric = cells.iter().all(|c| !matches!(c, Cell::Text(_)));
            if all_numeric {
                let values: Vec<Option<f64>> = cells
                    .iter()
                    .map(|c| match c {
                        Cell::Number(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                Column::new(name.into(), values)
            } else {
                let values: Vec<Option<String>> = cells
                    .into_iter()
                    .map(|c| match c {
                        Cell::Null => None,
                        Cell::Number(v) => Some(v.to_string()),
                        Cell::Text(s) => Some(s),
                    })
                    .collect();
                Column::new(name.into(), values)
            }
        })
        .collect();

    DataFrame::new(columns)
}

/// What the `.prj` sidecar says about the coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Wgs84,
    Other,
    Missing,
}

/// Warn when a `.prj` sidecar is absent or describes something other than geographic WGS84.
fn check_projection(shp_path: &Path) -> Projection {
    let prj_path = shp_path.with_extension("prj");
    let projection = match std::fs::read_to_string(&prj_path) {
        Ok(wkt) if is_wgs84(&wkt) => Projection::Wgs84,
        Ok(_) => Projection::Other,
        Err(_) => Projection::Missing,
    };

    match projection {
        Projection::Other => warn!(
            path = %prj_path.display(),
            "boundary CRS is not EPSG:4326; map backends expect longitude/latitude degrees"
        ),
        Projection::Missing => warn!(
            path = %shp_path.display(),
            "no .prj sidecar found; assuming EPSG:4326"
        ),
        Projection::Wgs84 => {}
    }
    projection
}

pub(crate) fn is_wgs84(wkt: &str) -> bool {
    let wkt = wkt.trim_start().to_ascii_uppercase();
    if wkt.starts_with("PROJCS") || wkt.starts_with("PROJCRS") {
        return false;
    }
    wkt.contains("WGS_1984") || wkt.contains("WGS 84") || wkt.contains("\"4326\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use geo::polygon;

    const REGIONS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"REGION": "North", "CODE": 7},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}
            },
            {
                "type": "Feature",
                "properties": {"REGION": "South", "CODE": 8, "NOTE": "coastal"},
                "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[0,-1],[1,-1],[1,0],[0,0],[0,-1]]],
                    [[[2,-1],[3,-1],[3,0],[2,0],[2,-1]]]
                ]}
            },
            {
                "type": "Feature",
                "properties": {"REGION": "Nowhere", "CODE": 9},
                "geometry": null
            }
        ]
    }"#;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_geojson_regions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "regions.geojson", REGIONS);

        let frame = RegionLoader::load(&path, &RegionOptions::default()).unwrap();
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.geometry_count(), 2);
        assert_eq!(frame.geometry(0).unwrap().0.len(), 1);
        assert_eq!(frame.geometry(1).unwrap().0.len(), 2);
        assert!(frame.geometry(2).is_none());

        let df = frame.frame();
        assert_eq!(df.column("CODE").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("REGION").unwrap().dtype(), &DataType::String);
        let notes = df.column("NOTE").unwrap();
        assert_eq!(notes.null_count(), 2);
    }

    #[test]
    fn non_polygon_geometry_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "points.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"REGION": "A"},
                 "geometry": {"type": "Point", "coordinates": [1, 2]}}
            ]}"#,
        );

        let err = RegionLoader::load(&path, &RegionOptions::default()).unwrap_err();
        match err {
            LoaderError::MalformedGeometry { row, reason } => {
                assert_eq!(row, 0);
                assert!(reason.contains("Point"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_region_file_is_reported() {
        let err = RegionLoader::load(Path::new("/no/such/regions.shp"), &RegionOptions::default())
            .unwrap_err();
        assert!(matches!(err, LoaderError::NotFound(_)));
    }

    fn square(x: f64) -> geo::Polygon<f64> {
        geo::polygon![
            (x: x, y: 0.0),
            (x: x, y: 1.0),
            (x: x + 1.0, y: 1.0),
            (x: x + 1.0, y: 0.0),
        ]
    }

    fn table_builder() -> dbase::TableWriterBuilder {
        dbase::TableWriterBuilder::new()
            .add_character_field("REGION".try_into().unwrap(), 20)
            .add_numeric_field("CODE".try_into().unwrap(), 10, 0)
    }

    fn record(region: &str, code: f64) -> dbase::Record {
        let mut record = dbase::Record::default();
        record.insert(
            "REGION".to_string(),
            FieldValue::Character(Some(region.to_string())),
        );
        record.insert("CODE".to_string(), FieldValue::Numeric(Some(code)));
        record
    }

    /// Two square regions, North (code 7) and South (code 12).
    fn write_shapefile(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("regions.shp");
        let mut writer = shapefile::Writer::from_path(&path, table_builder()).unwrap();
        writer
            .write_shape_and_record(&shapefile::Polygon::from(square(0.0)), &record("North", 7.0))
            .unwrap();
        writer
            .write_shape_and_record(&shapefile::Polygon::from(square(2.0)), &record("South", 12.0))
            .unwrap();
        path
    }

    #[test]
    fn loads_shapefile_regions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shapefile(&dir);
        write_file(&dir, "regions.prj", r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984"]]"#);

        let frame = RegionLoader::load(&path, &RegionOptions::default()).unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.geometry_count(), 2);

        let df = frame.frame();
        assert_eq!(df.column("REGION").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("CODE").unwrap().dtype(), &DataType::Float64);
        let codes: Vec<Option<f64>> = df
            .column("CODE")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(codes, vec![Some(7.0), Some(12.0)]);

        let north = frame.geometry(0).unwrap();
        assert_eq!(north.0.len(), 1);
        let bounds = geo::BoundingRect::bounding_rect(north).unwrap();
        assert_eq!((bounds.min().x, bounds.max().x), (0.0, 1.0));
        let south = geo::BoundingRect::bounding_rect(frame.geometry(1).unwrap()).unwrap();
        assert_eq!((south.min().x, south.max().x), (2.0, 3.0));
    }

    #[test]
    fn shape_and_record_counts_must_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shapefile(&dir);
        let mut table = table_builder()
            .build_with_file_dest(path.with_extension("dbf"))
            .unwrap();
        table.write_record(&record("North", 7.0)).unwrap();
        drop(table);

        let err = RegionLoader::load(&path, &RegionOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::RecordCountMismatch {
                shapes: 2,
                records: 1
            }
        ));
    }

    #[test]
    fn missing_attribute_table_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shapefile(&dir);
        std::fs::remove_file(path.with_extension("dbf")).unwrap();

        match RegionLoader::load(&path, &RegionOptions::default()).unwrap_err() {
            LoaderError::NotFound(missing) => assert_eq!(missing, path.with_extension("dbf")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_shape_becomes_null_geometry() {
        assert_eq!(shape_to_multipolygon(Shape::NullShape, 3).unwrap(), None);
    }

    #[test]
    fn projection_sidecar_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.shp");
        assert_eq!(check_projection(&path), Projection::Missing);

        write_file(&dir, "regions.prj", r#"PROJCS["WGS_1984_UTM_Zone_51N",GEOGCS["GCS_WGS_1984"]]"#);
        assert_eq!(check_projection(&path), Projection::Other);

        write_file(&dir, "regions.prj", r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984"]]"#);
        assert_eq!(check_projection(&path), Projection::Wgs84);
    }

    #[test]
    fn recognizes_wgs84_projection() {
        let geographic = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["Degree",0.017453292519943295]]"#;
        let projected = r#"PROJCS["WGS_1984_UTM_Zone_51N",GEOGCS["GCS_WGS_1984"]]"#;

        assert!(is_wgs84(geographic));
        assert!(!is_wgs84(projected));
        assert!(!is_wgs84(r#"GEOGCS["GCS_Luzon_1911"]"#));
    }
}
