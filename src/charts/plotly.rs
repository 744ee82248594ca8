//! Plotly HTML Backend
//! Writes an interactive tile-map choropleth as a self-contained HTML page.

use super::choropleth::{ChoroplethMap, MapBackend, RenderError};
use super::colorscale::{format_value, Classification};
use geojson::{Feature, FeatureCollection};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

/// Feature property matched against trace locations.
const ID_PROPERTY: &str = "id";

/// Styles the token-free MapLibre basemap understands.
const OPEN_STYLES: [&str; 6] = [
    "basic",
    "carto-darkmatter",
    "carto-positron",
    "carto-voyager",
    "open-street-map",
    "white-bg",
];

pub struct PlotlyHtmlRenderer {
    path: PathBuf,
    mapbox_token: Option<String>,
}

impl PlotlyHtmlRenderer {
    pub fn new(path: impl Into<PathBuf>, mapbox_token: Option<String>) -> Self {
        Self {
            path: path.into(),
            mapbox_token,
        }
    }

    /// Plotly figure (`data` + `layout`) for the map.
    pub fn figure(map: &ChoroplethMap, mapbox_token: Option<&str>) -> Result<Value, RenderError> {
        let features: FeatureCollection = map
            .regions
            .iter()
            .map(|region| {
                let mut feature = Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::from(&region.geometry))),
                    id: None,
                    properties: None,
                    foreign_members: None,
                };
                feature.set_property(ID_PROPERTY, region.id.clone());
                feature
            })
            .collect();

        // Regions without a value stay off the trace and are not shaded
        let valued: Vec<_> = map.regions.iter().filter(|r| r.value.is_some()).collect();
        let locations: Vec<&str> = valued.iter().map(|r| r.id.as_str()).collect();
        let values: Vec<f64> = valued.iter().filter_map(|r| r.value).collect();

        let colorscale: Vec<Value> = map
            .mapper
            .scale
            .plotly_stops()
            .into_iter()
            .map(|(position, color)| json!([position, color]))
            .collect();

        let (z, colorbar) = match map.mapper.classification {
            Classification::Quantile(_) => {
                let classes: Vec<usize> = values
                    .iter()
                    .filter_map(|&v| map.mapper.class_of(v))
                    .collect();
                let labels: Vec<String> =
                    map.mapper.legend(0).into_iter().map(|(_, label)| label).collect();
                let ticks: Vec<usize> = (0..labels.len()).collect();
                (
                    json!(classes),
                    json!({
                        "title": {"text": map.value_label},
                        "tickvals": ticks,
                        "ticktext": labels,
                    }),
                )
            }
            Classification::Linear => (json!(values), json!({"title": {"text": map.value_label}})),
        };

        let custom: Vec<String> = values.iter().map(|&v| format_value(v)).collect();

        let mut trace = json!({
            "type": "choroplethmap",
            "geojson": serde_json::to_value(&features)?,
            "featureidkey": format!("properties.{}", ID_PROPERTY),
            "locations": locations,
            "z": z,
            "customdata": custom,
            "colorscale": colorscale,
            "colorbar": colorbar,
            "marker": {"opacity": map.opacity, "line": {"width": 0.5, "color": "#444"}},
            "hovertemplate": format!("%{{location}}<br>{}=%{{customdata}}<extra></extra>", map.value_label),
        });

        let view = json!({
            "zoom": map.zoom,
            "center": {"lon": map.center[0], "lat": map.center[1]},
        });

        let (map_key, view) = match mapbox_token {
            Some(token) => {
                trace["type"] = json!("choroplethmapbox");
                let mut view = view;
                view["style"] = json!(map.basemap);
                view["accesstoken"] = json!(token);
                ("mapbox", view)
            }
            None => {
                let mut view = view;
                view["style"] = json!(open_style(&map.basemap));
                ("map", view)
            }
        };

        let mut layout = json!({
            "title": {"text": map.title()},
            "margin": {"r": 0, "t": 40, "l": 0, "b": 0},
        });
        layout[map_key] = view;

        Ok(json!({"data": [trace], "layout": layout}))
    }

    pub fn html(map: &ChoroplethMap, mapbox_token: Option<&str>) -> Result<String, RenderError> {
        let figure = Self::figure(map, mapbox_token)?;
        // Keep "</script>" inside string values from closing the tag
        let payload = serde_json::to_string(&figure)?.replace("</", "<\\/");

        Ok(format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{cdn}"></script>
<style>html, body, #map {{ margin: 0; width: 100%; height: 100%; }}</style>
</head>
<body>
<div id="map"></div>
<script>
const figure = {payload};
Plotly.newPlot("map", figure.data, figure.layout, {{responsive: true}});
</script>
</body>
</html>
"#,
            title = escape_html(&map.title()),
            cdn = PLOTLY_CDN,
            payload = payload,
        ))
    }
}

impl MapBackend for PlotlyHtmlRenderer {
    fn name(&self) -> &'static str {
        "plotly-html"
    }

    fn render(&self, map: &ChoroplethMap) -> Result<(), RenderError> {
        let html = Self::html(map, self.mapbox_token.as_deref())?;
        std::fs::write(&self.path, html).map_err(|source| RenderError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "wrote interactive map");
        Ok(())
    }
}

/// Map Mapbox-only style names onto a token-free equivalent.
fn open_style(style: &str) -> &str {
    if OPEN_STYLES.contains(&style) {
        return style;
    }
    match style {
        "dark" => "carto-darkmatter",
        "streets" | "outdoors" => "open-street-map",
        _ => "carto-positron",
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
