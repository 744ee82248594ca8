//! Merger Module
//! Joins a statistics table onto region geometry by a normalized key.

use super::frame::{FrameError, GeoFrame};
use polars::prelude::*;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

const KEY_COLUMN: &str = "__join_key";
const LEFT_ROW: &str = "__statistics_row";
const REGION_ROW: &str = "__region_row";

/// Unmatched keys shown in the log.
const UNMATCHED_SAMPLE: usize = 5;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Column '{column}' not found in {table} table")]
    MissingColumn { table: &'static str, column: String },
    #[error("Region key '{key}' appears more than once (rows {first} and {second})")]
    DuplicateRegionKey {
        key: String,
        first: usize,
        second: usize,
    },
    #[error("Join produced no matches between statistics column '{statistics_key}' and region column '{region_key}'")]
    NoMatches {
        statistics_key: String,
        region_key: String,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Join kind, with the statistics table on the left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// Keep statistics rows that match a region
    #[default]
    Inner,
    /// Keep every statistics row; unmatched rows get null geometry
    Left,
}

impl From<JoinKind> for JoinType {
    fn from(kind: JoinKind) -> Self {
        match kind {
            JoinKind::Inner => JoinType::Inner,
            JoinKind::Left => JoinType::Left,
        }
    }
}

/// Key columns and join kind.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub statistics_key: String,
    pub region_key: String,
    pub kind: JoinKind,
}

/// Normalize a region identifier for comparison.
///
/// Trims, collapses internal whitespace, lowercases, and strips leading zeros
/// from purely numeric codes. Returns `None` for blank keys.
pub fn normalize_key(raw: &str) -> Option<String> {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if collapsed.is_empty() {
        return None;
    }

    // "7.0" is the code 7
    let digits = match collapsed.split_once('.') {
        Some((whole, fraction))
            if !whole.is_empty() && !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') =>
        {
            whole
        }
        _ => collapsed.as_str(),
    };

    if digits.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = digits.trim_start_matches('0');
        return Some(if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        });
    }

    Some(collapsed)
}

/// Normalized keys of one column, cast to strings first.
///
/// Integral floats are written without a fraction so a Float64 code of `7.0`
/// keys the same as `7` or `"007"`.
pub fn normalized_keys(
    df: &DataFrame,
    column: &str,
    table: &'static str,
) -> Result<Vec<Option<String>>, MergeError> {
    let column = df.column(column).map_err(|_| MergeError::MissingColumn {
        table,
        column: column.to_string(),
    })?;

    if column.dtype().is_float() {
        let values = column.cast(&DataType::Float64)?;
        return Ok(values
            .f64()?
            .into_iter()
            .map(|v| v.filter(|v| v.is_finite()).and_then(|v| normalize_key(&float_key(v))))
            .collect());
    }

    let series = column.cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.and_then(normalize_key))
        .collect())
}

fn float_key(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Handles the attribute join between statistics and regions.
pub struct Merger;

impl Merger {
    /// Join `statistics` (left) onto `regions`, producing one GeoFrame.
    ///
    /// Output rows follow the statistics table order.
    pub fn merge(
        statistics: &DataFrame,
        regions: &GeoFrame,
        spec: &JoinSpec,
    ) -> Result<GeoFrame, MergeError> {
        let left_keys = normalized_keys(statistics, &spec.statistics_key, "statistics")?;
        let region_keys = normalized_keys(regions.frame(), &spec.region_key, "region")?;

        Self::check_unique(&region_keys)?;
        Self::log_duplicates(&left_keys, &spec.statistics_key);

        let mut left = statistics.clone();
        left.with_column(Column::new(KEY_COLUMN.into(), left_keys.clone()))?;
        left.with_column(Column::new(
            LEFT_ROW.into(),
            (0..statistics.height() as u32).collect::<Vec<u32>>(),
        ))?;

        let mut right = regions.frame().clone();
        if spec.region_key == spec.statistics_key {
            right = right.drop(&spec.region_key)?;
        }
        right.with_column(Column::new(KEY_COLUMN.into(), region_keys.clone()))?;
        right.with_column(Column::new(
            REGION_ROW.into(),
            (0..regions.height() as u32).collect::<Vec<u32>>(),
        ))?;

        let joined = left
            .lazy()
            .join(
                right.lazy(),
                [col(KEY_COLUMN)],
                [col(KEY_COLUMN)],
                JoinArgs::new(spec.kind.into()),
            )
            .sort_by_exprs([col(LEFT_ROW)], SortMultipleOptions::default())
            .collect()?;

        let region_rows = joined.column(REGION_ROW)?.u32()?;
        let geometries: Vec<_> = region_rows
            .into_iter()
            .map(|row| row.and_then(|r| regions.geometry(r as usize).cloned()))
            .collect();
        let matched = region_rows.into_iter().filter(|r| r.is_some()).count();

        if matched == 0 {
            return Err(MergeError::NoMatches {
                statistics_key: spec.statistics_key.clone(),
                region_key: spec.region_key.clone(),
            });
        }

        Self::log_unmatched(&left_keys, &region_keys);

        let mut merged = joined;
        for name in [KEY_COLUMN, LEFT_ROW, REGION_ROW] {
            if merged.column(name).is_ok() {
                merged = merged.drop(name)?;
            }
        }

        info!(
            kind = ?spec.kind,
            statistics = statistics.height(),
            regions = regions.height(),
            matched,
            rows = merged.height(),
            "merged statistics with regions"
        );

        Ok(GeoFrame::new(merged, regions.geometry_name(), geometries)?)
    }

    /// A region key matching several polygons makes the join ambiguous.
    fn check_unique(keys: &[Option<String>]) -> Result<(), MergeError> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (row, key) in keys.iter().enumerate() {
            let Some(key) = key else { continue };
            if let Some(&first) = seen.get(key.as_str()) {
                return Err(MergeError::DuplicateRegionKey {
                    key: key.clone(),
                    first,
                    second: row,
                });
            }
            seen.insert(key, row);
        }
        Ok(())
    }

    fn log_duplicates(keys: &[Option<String>], column: &str) {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for key in keys.iter().flatten() {
            *counts.entry(key).or_default() += 1;
        }
        let duplicated = counts.values().filter(|&&n| n > 1).count();
        if duplicated > 0 {
            warn!(column, duplicated, "statistics keys repeat; regions will appear more than once");
        }
    }

    fn log_unmatched(left_keys: &[Option<String>], region_keys: &[Option<String>]) {
        let regions: HashSet<&str> =
            region_keys.iter().flatten().map(|k| k.as_str()).collect();

        let unmatched: Vec<&str> = left_keys
            .iter()
            .map(|k| k.as_deref())
            .filter(|k| !k.is_some_and(|k| regions.contains(k)))
            .map(|k| k.unwrap_or("<null>"))
            .collect();

        if !unmatched.is_empty() {
            let sample: Vec<&str> = unmatched.iter().take(UNMATCHED_SAMPLE).copied().collect();
            warn!(
                count = unmatched.len(),
                sample = ?sample,
                "statistics rows without a matching region"
            );
        } else {
            debug!("every statistics row matched a region");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::GEOMETRY_COLUMN;
    use geo::{polygon, MultiPolygon};

    fn square(x: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x, y: 0.0),
            (x: x + 1.0, y: 0.0),
            (x: x + 1.0, y: 1.0),
            (x: x, y: 1.0),
        ]])
    }

    fn regions() -> GeoFrame {
        let df = df!("name" => ["A", "B"]).unwrap();
        GeoFrame::new(df, GEOMETRY_COLUMN, vec![Some(square(0.0)), Some(square(2.0))]).unwrap()
    }

    fn spec(kind: JoinKind) -> JoinSpec {
        JoinSpec {
            statistics_key: "region".to_string(),
            region_key: "name".to_string(),
            kind,
        }
    }

    fn keys(frame: &GeoFrame, column: &str) -> Vec<Option<String>> {
        frame
            .frame()
            .column(column)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    #[test]
    fn normalizes_case_whitespace_and_leading_zeros() {
        assert_eq!(normalize_key("US-01"), normalize_key("us-01 "));
        assert_eq!(normalize_key("  New   York "), Some("new york".to_string()));
        assert_eq!(normalize_key("007"), Some("7".to_string()));
        assert_eq!(normalize_key("000"), Some("0".to_string()));
        assert_eq!(normalize_key("7.0"), Some("7".to_string()));
        assert_eq!(normalize_key("007.00"), Some("7".to_string()));
        assert_eq!(normalize_key("7.5"), Some("7.5".to_string()));
        assert_eq!(normalize_key("v1.0"), Some("v1.0".to_string()));
        assert_eq!(normalize_key("PH-007"), Some("ph-007".to_string()));
        assert_eq!(normalize_key("   "), None);
    }

    #[test]
    fn inner_join_keeps_only_matches() {
        let stats = df!("region" => ["A", "C"], "value" => [10.0, 20.0]).unwrap();

        let merged = Merger::merge(&stats, &regions(), &spec(JoinKind::Inner)).unwrap();
        assert_eq!(merged.height(), 1);
        assert_eq!(keys(&merged, "region"), vec![Some("A".to_string())]);
        assert_eq!(merged.geometry(0), Some(&square(0.0)));

        let values: Vec<Option<f64>> = merged
            .frame()
            .column("value")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(values, vec![Some(10.0)]);
    }

    #[test]
    fn left_join_keeps_unmatched_statistics_with_null_geometry() {
        let stats = df!("region" => ["A", "C"], "value" => [10.0, 20.0]).unwrap();

        let merged = Merger::merge(&stats, &regions(), &spec(JoinKind::Left)).unwrap();
        assert_eq!(merged.height(), 2);
        assert_eq!(
            keys(&merged, "region"),
            vec![Some("A".to_string()), Some("C".to_string())]
        );
        assert_eq!(merged.geometry(0), Some(&square(0.0)));
        assert!(merged.geometry(1).is_none());
        assert_eq!(keys(&merged, "name"), vec![Some("A".to_string()), None]);
    }

    #[test]
    fn keys_match_after_normalization_and_keep_statistics_order() {
        let stats = df!(
            "region" => [" b", "a ", "B"],
            "value" => [1.0, 2.0, 3.0]
        )
        .unwrap();

        let merged = Merger::merge(&stats, &regions(), &spec(JoinKind::Inner)).unwrap();
        assert_eq!(merged.height(), 3);
        assert_eq!(merged.geometry(0), Some(&square(2.0)));
        assert_eq!(merged.geometry(1), Some(&square(0.0)));
        assert_eq!(merged.geometry(2), Some(&square(2.0)));
        assert!(merged.frame().column(KEY_COLUMN).is_err());
        assert!(merged.frame().column(REGION_ROW).is_err());
    }

    #[test]
    fn numeric_codes_match_zero_padded_strings() {
        let df = df!("code" => ["001", "002"]).unwrap();
        let regions =
            GeoFrame::new(df, GEOMETRY_COLUMN, vec![Some(square(0.0)), Some(square(2.0))])
                .unwrap();
        let stats = df!("code" => [2i64, 1], "value" => [5.0, 6.0]).unwrap();
        let spec = JoinSpec {
            statistics_key: "code".to_string(),
            region_key: "code".to_string(),
            kind: JoinKind::Inner,
        };

        let merged = Merger::merge(&stats, &regions, &spec).unwrap();
        assert_eq!(merged.height(), 2);
        assert_eq!(merged.geometry(0), Some(&square(2.0)));
        assert_eq!(merged.geometry(1), Some(&square(0.0)));
        assert!(merged.frame().column("code_right").is_err());
    }

    #[test]
    fn float_region_codes_match_integer_and_padded_codes() {
        let df = df!("CODE" => [7.0f64, 12.0]).unwrap();
        let regions =
            GeoFrame::new(df, GEOMETRY_COLUMN, vec![Some(square(0.0)), Some(square(2.0))])
                .unwrap();
        let spec = JoinSpec {
            statistics_key: "CODE".to_string(),
            region_key: "CODE".to_string(),
            kind: JoinKind::Inner,
        };

        let padded = df!("CODE" => ["007", "012"], "value" => [1.0, 2.0]).unwrap();
        let merged = Merger::merge(&padded, &regions, &spec).unwrap();
        assert_eq!(merged.height(), 2);
        assert_eq!(merged.geometry(0), Some(&square(0.0)));
        assert_eq!(merged.geometry(1), Some(&square(2.0)));

        let integers = df!("CODE" => [12i64], "value" => [3.0]).unwrap();
        let merged = Merger::merge(&integers, &regions, &spec).unwrap();
        assert_eq!(merged.height(), 1);
        assert_eq!(merged.geometry(0), Some(&square(2.0)));
    }

    #[test]
    fn user_columns_with_underscore_prefix_survive() {
        let stats = df!(
            "region" => ["A"],
            "__source" => ["census"],
            "value" => [1.0]
        )
        .unwrap();

        let merged = Merger::merge(&stats, &regions(), &spec(JoinKind::Inner)).unwrap();
        assert!(merged.frame().column("__source").is_ok());
        assert!(merged.frame().column(LEFT_ROW).is_err());
        assert!(merged.frame().column(KEY_COLUMN).is_err());
        assert!(merged.frame().column(REGION_ROW).is_err());
    }

    #[test]
    fn zero_matches_is_an_error() {
        let stats = df!("region" => ["X", "Y"], "value" => [1.0, 2.0]).unwrap();

        let err = Merger::merge(&stats, &regions(), &spec(JoinKind::Left)).unwrap_err();
        assert!(matches!(err, MergeError::NoMatches { .. }));
    }

    #[test]
    fn duplicate_region_keys_are_rejected() {
        let df = df!("name" => ["A", " a"]).unwrap();
        let regions =
            GeoFrame::new(df, GEOMETRY_COLUMN, vec![Some(square(0.0)), Some(square(2.0))])
                .unwrap();
        let stats = df!("region" => ["A"], "value" => [1.0]).unwrap();

        let err = Merger::merge(&stats, &regions, &spec(JoinKind::Inner)).unwrap_err();
        assert!(matches!(
            err,
            MergeError::DuplicateRegionKey { first: 0, second: 1, .. }
        ));
    }

    #[test]
    fn missing_key_column_names_the_column() {
        let stats = df!("province" => ["A"], "value" => [1.0]).unwrap();

        let err = Merger::merge(&stats, &regions(), &spec(JoinKind::Inner)).unwrap_err();
        assert!(err.to_string().contains("'region'"));
        assert!(err.to_string().contains("statistics"));
    }
}
