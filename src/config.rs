//! Run configuration: TOML file, CLI overrides, validation.

use crate::charts::{ChoroplethSpec, Classification, ColorScale, MapStyle};
use crate::data::{
    Aggregation, JoinKind, JoinSpec, PointSpec, RegionOptions, TableOptions, GEOMETRY_COLUMN,
    POINT_COUNT_COLUMN,
};
use crate::Cli;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Written when no output is requested at all.
pub const DEFAULT_HTML: &str = "choropleth.html";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub data: DataSettings,
    pub points: Option<PointSettings>,
    pub map: MapSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSettings {
    pub regions: Option<PathBuf>,
    pub statistics: Option<PathBuf>,
    pub separator: String,
    pub region_key: String,
    /// Falls back to `region_key`
    pub statistics_key: Option<String>,
    pub join: JoinKind,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            regions: None,
            statistics: None,
            separator: ",".to_string(),
            region_key: "REGION".to_string(),
            statistics_key: None,
            join: JoinKind::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PointSettings {
    pub path: Option<PathBuf>,
    pub longitude: String,
    pub latitude: String,
    pub value: String,
    pub aggregate: Aggregation,
}

impl Default for PointSettings {
    fn default() -> Self {
        Self {
            path: None,
            longitude: "longitude".to_string(),
            latitude: "latitude".to_string(),
            value: "values".to_string(),
            aggregate: Aggregation::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapSettings {
    /// Falls back to the point value column, then "values"
    pub value_column: Option<String>,
    pub geometry_column: String,
    /// Falls back to the statistics key
    pub id_column: Option<String>,
    pub color_scale: ColorScale,
    pub classification: Classification,
    pub opacity: f64,
    pub zoom: Option<f64>,
    pub center: Option<[f64; 2]>,
    pub style: String,
    pub title: Option<String>,
}

impl Default for MapSettings {
    fn default() -> Self {
        let style = MapStyle::default();
        Self {
            value_column: None,
            geometry_column: GEOMETRY_COLUMN.to_string(),
            id_column: None,
            color_scale: style.color_scale,
            classification: style.classification,
            opacity: style.opacity,
            zoom: None,
            center: None,
            style: style.basemap,
            title: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    pub html: Option<PathBuf>,
    pub png: Option<PathBuf>,
    pub geojson: Option<PathBuf>,
    pub width: u32,
    pub mapbox_token_file: Option<PathBuf>,
    pub open: bool,
    pub view: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            html: None,
            png: None,
            geojson: None,
            width: 1200,
            mapbox_token_file: Some(PathBuf::from(".mapbox_token")),
            open: false,
            view: false,
        }
    }
}

impl Settings {
    /// Load the config file if given, apply CLI overrides and validate.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut settings = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded config file");
        Ok(settings)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(regions) = &cli.regions {
            self.data.regions = Some(regions.clone());
        }
        if let Some(statistics) = &cli.statistics {
            self.data.statistics = Some(statistics.clone());
            self.points = None;
        }
        if let Some(points) = &cli.points {
            self.points.get_or_insert_with(PointSettings::default).path = Some(points.clone());
            self.data.statistics = None;
        }
        if let Some(html) = &cli.html {
            self.output.html = Some(html.clone());
        }
        if let Some(png) = &cli.png {
            self.output.png = Some(png.clone());
        }
        if let Some(geojson) = &cli.geojson {
            self.output.geojson = Some(geojson.clone());
        }
        self.output.open |= cli.open;
        self.output.view |= cli.view;

        let any_output = self.output.html.is_some()
            || self.output.png.is_some()
            || self.output.geojson.is_some()
            || self.output.view;
        if !any_output || (self.output.open && self.output.html.is_none()) {
            self.output.html = Some(PathBuf::from(DEFAULT_HTML));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.regions.is_none() {
            return Err(invalid("a region boundary file is required"));
        }
        match &self.points {
            Some(points) if points.path.is_none() => {
                return Err(invalid("[points] needs a path"));
            }
            Some(points)
                if points.value == POINT_COUNT_COLUMN || points.value == self.data.region_key =>
            {
                // Aggregated columns are [region_key, value, point_count]
                return Err(invalid(&format!(
                    "point value column '{}' collides with an aggregated column name",
                    points.value
                )));
            }
            None if self.data.statistics.is_none() => {
                return Err(invalid("either a statistics table or a point dataset is required"));
            }
            _ => {}
        }
        self.separator()?;
        if !(0.0..=1.0).contains(&self.map.opacity) {
            return Err(invalid(&format!(
                "opacity must be within [0, 1], got {}",
                self.map.opacity
            )));
        }
        if let Classification::Quantile(n) = self.map.classification {
            if n < 2 {
                return Err(invalid(&format!("quantile classification needs at least 2 classes, got {}", n)));
            }
        }
        if self.output.width == 0 {
            return Err(invalid("image width must be positive"));
        }
        if let Some(zoom) = self.map.zoom {
            if !zoom.is_finite() || zoom < 0.0 {
                return Err(invalid(&format!("zoom must be a non-negative number, got {}", zoom)));
            }
        }
        Ok(())
    }

    fn separator(&self) -> Result<u8, ConfigError> {
        match self.data.separator.as_bytes() {
            [b] if b.is_ascii() => Ok(*b),
            _ => Err(invalid(&format!(
                "separator must be a single ASCII character, got '{}'",
                self.data.separator
            ))),
        }
    }

    pub fn statistics_key(&self) -> &str {
        self.data
            .statistics_key
            .as_deref()
            .unwrap_or(&self.data.region_key)
    }

    pub fn value_column(&self) -> &str {
        match (&self.map.value_column, &self.points) {
            (Some(column), _) => column,
            (None, Some(points)) => &points.value,
            (None, None) => "values",
        }
    }

    pub fn table_options(&self) -> Result<TableOptions, ConfigError> {
        Ok(TableOptions {
            separator: self.separator()?,
            ..Default::default()
        })
    }

    pub fn region_options(&self) -> RegionOptions {
        RegionOptions {
            geometry_column: self.map.geometry_column.clone(),
        }
    }

    pub fn join_spec(&self) -> JoinSpec {
        // Aggregated point tables are keyed by the region key column
        let statistics_key = if self.points.is_some() {
            self.data.region_key.clone()
        } else {
            self.statistics_key().to_string()
        };
        JoinSpec {
            statistics_key,
            region_key: self.data.region_key.clone(),
            kind: self.data.join,
        }
    }

    pub fn point_spec(&self) -> Option<(&Path, PointSpec)> {
        let points = self.points.as_ref()?;
        let spec = PointSpec {
            longitude: points.longitude.clone(),
            latitude: points.latitude.clone(),
            value: points.value.clone(),
            aggregate: points.aggregate,
        };
        Some((points.path.as_deref()?, spec))
    }

    pub fn choropleth_spec(&self) -> ChoroplethSpec {
        let id_column = match (&self.map.id_column, &self.points) {
            (Some(column), _) => column.clone(),
            (None, Some(_)) => self.data.region_key.clone(),
            (None, None) => self.statistics_key().to_string(),
        };
        ChoroplethSpec {
            geometry_column: self.map.geometry_column.clone(),
            value_column: self.value_column().to_string(),
            id_column,
            style: MapStyle {
                zoom: self.map.zoom,
                center: self.map.center,
                color_scale: self.map.color_scale,
                classification: self.map.classification,
                opacity: self.map.opacity,
                basemap: self.map.style.clone(),
                title: self.map.title.clone(),
            },
        }
    }

    /// Mapbox access token, when a token file is configured and present.
    pub fn mapbox_token(&self) -> Result<Option<String>, ConfigError> {
        let Some(path) = &self.output.mapbox_token_file else {
            return Ok(None);
        };
        if !path.is_file() {
            debug!(path = %path.display(), "no mapbox token file");
            return Ok(None);
        }
        let token = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let token = token.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
