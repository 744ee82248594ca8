//! Tabular Data Loader Module
//! Handles delimited and JSON table loading and column inspection using Polars.

use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse table: {0}")]
    Table(#[from] PolarsError),
    #[error("Failed to read shapefile: {0}")]
    Shapefile(#[from] shapefile::Error),
    #[error("Failed to read attribute table: {0}")]
    Dbase(#[from] shapefile::dbase::Error),
    #[error("Failed to parse GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("Malformed geometry in row {row}: {reason}")]
    MalformedGeometry { row: usize, reason: String },
    #[error("Shapefile has {shapes} shapes but {records} attribute records")]
    RecordCountMismatch { shapes: usize, records: usize },
    #[error("No rows loaded from {0}")]
    Empty(PathBuf),
    #[error(transparent)]
    Frame(#[from] super::FrameError),
}

/// Options for reading a statistics or point table.
#[derive(Debug, Clone)]
pub struct TableOptions {
    pub separator: u8,
    pub infer_schema_length: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            separator: b',',
            infer_schema_length: 10000,
        }
    }
}

/// Handles table loading with Polars.
pub struct DataLoader;

impl DataLoader {
    /// Load a delimited (or JSON records) file into a DataFrame.
    pub fn load_table(path: &Path, options: &TableOptions) -> Result<DataFrame, LoaderError> {
        if !path.is_file() {
            return Err(LoaderError::NotFound(path.to_path_buf()));
        }

        let df = match extension(path).as_deref() {
            Some("json") => {
                let file = File::open(path).map_err(|source| LoaderError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                flatten_structs(JsonReader::new(file).finish()?)?
            }
            Some("csv" | "tsv" | "txt") | None => LazyCsvReader::new(path)
                .with_has_header(true)
                .with_separator(options.separator)
                .with_infer_schema_length(Some(options.infer_schema_length))
                .finish()?
                .collect()?,
            Some(_) => return Err(LoaderError::UnsupportedFormat(path.to_path_buf())),
        };

        if df.height() == 0 {
            return Err(LoaderError::Empty(path.to_path_buf()));
        }

        info!(
            path = %path.display(),
            rows = df.height(),
            columns = df.width(),
            "loaded table"
        );
        debug!(columns = ?Self::column_names(&df), "table columns");

        Ok(df)
    }

    /// Get list of column names.
    pub fn column_names(df: &DataFrame) -> Vec<String> {
        df.get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Get list of numeric column names.
    pub fn numeric_columns(df: &DataFrame) -> Vec<String> {
        df.get_columns()
            .iter()
            .filter(|col| is_numeric(col.dtype()))
            .map(|col| col.name().to_string())
            .collect()
    }
}

pub fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float32
            | DataType::Float64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Flatten nested records into `parent.child` columns.
fn flatten_structs(df: DataFrame) -> PolarsResult<DataFrame> {
    if !df
        .get_columns()
        .iter()
        .any(|c| matches!(c.dtype(), DataType::Struct(_)))
    {
        return Ok(df);
    }

    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        flatten_into(column.as_materialized_series(), column.name().as_str(), &mut columns)?;
    }
    DataFrame::new(columns)
}

fn flatten_into(series: &Series, name: &str, out: &mut Vec<Column>) -> PolarsResult<()> {
    if let DataType::Struct(_) = series.dtype() {
        for field in series.struct_()?.fields_as_series() {
            let nested = format!("{}.{}", name, field.name());
            flatten_into(&field, &nested, out)?;
        }
    } else {
        out.push(series.clone().with_name(name.into()).into_column());
    }
    Ok(())
}

/// Lowercased file extension.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_delimited_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "stats.csv", "region;value\nA;10\nB;20.5\n");
        let options = TableOptions {
            separator: b';',
            ..Default::default()
        };

        let df = DataLoader::load_table(&path, &options).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(DataLoader::column_names(&df), vec!["region", "value"]);
        assert_eq!(DataLoader::numeric_columns(&df), vec!["value"]);
    }

    #[test]
    fn loads_json_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "points.json",
            r#"[{"lon": 1.0, "lat": 2.0, "values": 3.0}, {"lon": 4.0, "lat": 5.0, "values": 6.0}]"#,
        );

        let df = DataLoader::load_table(&path, &TableOptions::default()).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(DataLoader::numeric_columns(&df).len(), 3);
    }

    #[test]
    fn nested_json_records_are_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "sample_set.json",
            r#"[{"attributes": {"location_longitude": 121.0, "location_latitude": 14.6}, "values": 1.0}]"#,
        );

        let df = DataLoader::load_table(&path, &TableOptions::default()).unwrap();
        assert!(df.column("attributes.location_longitude").is_ok());
        assert!(df.column("attributes.location_latitude").is_ok());
        assert!(df.column("values").is_ok());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = DataLoader::load_table(Path::new("/no/such/stats.csv"), &TableOptions::default())
            .unwrap_err();
        assert!(matches!(err, LoaderError::NotFound(_)));
        assert!(err.to_string().contains("/no/such/stats.csv"));
    }

    #[test]
    fn header_only_table_is_empty_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.csv", "region,value\n");

        let err = DataLoader::load_table(&path, &TableOptions::default()).unwrap_err();
        assert!(matches!(err, LoaderError::Empty(_)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "stats.xlsx", "not a table");

        let err = DataLoader::load_table(&path, &TableOptions::default()).unwrap_err();
        assert!(matches!(err, LoaderError::UnsupportedFormat(_)));
    }
}
