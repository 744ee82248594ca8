//! Map Viewer Widget
//! Central panel showing the choropleth with egui_plot.
//! Regions are triangulated once so concave outlines fill correctly; pan and zoom are
//! handled by the plot and the region under the pointer is reported on hover.

use crate::charts::{format_value, ChoroplethMap, MapRegion};
use egui::{Color32, RichText, Stroke};
use egui_plot::{Line, Plot, PlotPoints, Polygon};
use geo::{Contains, MultiPolygon, Point, Simplify, TriangulateEarcut};

/// Simplification tolerance as a share of the larger map extent.
const SIMPLIFY_RATIO: f64 = 0.0005;

const OUTLINE_COLOR: Color32 = Color32::from_rgb(60, 60, 60);
const HOVER_COLOR: Color32 = Color32::from_rgb(255, 140, 0);

/// Triangulated geometry of one region.
struct RegionShape {
    triangles: Vec<[[f64; 2]; 3]>,
    rings: Vec<Vec<[f64; 2]>>,
    fill: Color32,
}

/// Interactive map display.
#[derive(Default)]
pub struct MapViewer {
    shapes: Vec<RegionShape>,
    /// Longitude shrink at the map's middle latitude
    lat_scale: f64,
    pub show_outlines: bool,
    hovered: Option<usize>,
}

impl MapViewer {
    pub fn new() -> Self {
        Self {
            show_outlines: true,
            lat_scale: 1.0,
            ..Default::default()
        }
    }

    /// Rebuild shapes and colors from a map.
    pub fn set_map(&mut self, map: &ChoroplethMap) {
        let span = map.bounds.width().max(map.bounds.height());
        let epsilon = span * SIMPLIFY_RATIO;

        self.shapes = map
            .regions
            .iter()
            .map(|region| {
                let simplified: MultiPolygon<f64> = region.geometry.simplify(&epsilon);
                let triangles = simplified
                    .0
                    .iter()
                    .flat_map(|polygon| polygon.earcut_triangles())
                    .map(|t| t.to_array().map(|c| [c.x, c.y]))
                    .collect();
                let rings = simplified
                    .0
                    .iter()
                    .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
                    .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
                    .collect();

                RegionShape {
                    triangles,
                    rings,
                    fill: Color32::TRANSPARENT,
                }
            })
            .collect();

        let mid = (map.bounds.min().y + map.bounds.max().y) / 2.0;
        self.lat_scale = mid.to_radians().cos().max(0.1);
        self.hovered = None;
        self.recolor(map);
    }

    /// Refresh fills after a color scale, classification or opacity change.
    pub fn recolor(&mut self, map: &ChoroplethMap) {
        let alpha = (map.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
        for (shape, region) in self.shapes.iter_mut().zip(&map.regions) {
            let [r, g, b] = map.fill(region);
            shape.fill = Color32::from_rgba_unmultiplied(r, g, b, alpha);
        }
    }

    /// Draw the map and the hover readout.
    pub fn show(&mut self, ui: &mut egui::Ui, map: &ChoroplethMap) {
        if self.shapes.is_empty() {
            ui.centered_and_justified(|ui| {
                ui.label(RichText::new("No Data").size(20.0));
            });
            return;
        }

        ui.horizontal(|ui| {
            ui.label(RichText::new(map.title()).size(18.0).strong());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let text = self
                    .hovered
                    .and_then(|i| map.regions.get(i))
                    .map(hover_text)
                    .unwrap_or_default();
                ui.label(RichText::new(text).size(14.0));
            });
        });
        ui.add_space(5.0);

        let shapes = &self.shapes;
        let show_outlines = self.show_outlines;
        let hovered = self.hovered;

        let response = Plot::new("choropleth")
            .data_aspect((1.0 / self.lat_scale) as f32)
            .x_axis_label("Longitude")
            .y_axis_label("Latitude")
            .allow_scroll(false)
            .show(ui, |plot_ui| {
                for (i, shape) in shapes.iter().enumerate() {
                    for triangle in &shape.triangles {
                        plot_ui.polygon(
                            Polygon::new(PlotPoints::from(triangle.to_vec()))
                                .fill_color(shape.fill)
                                .stroke(Stroke::NONE),
                        );
                    }

                    let is_hovered = hovered == Some(i);
                    if show_outlines || is_hovered {
                        let (color, width) = if is_hovered {
                            (HOVER_COLOR, 2.5)
                        } else {
                            (OUTLINE_COLOR, 0.8)
                        };
                        for ring in &shape.rings {
                            plot_ui.line(
                                Line::new(PlotPoints::from(ring.clone()))
                                    .color(color)
                                    .width(width),
                            );
                        }
                    }
                }

                plot_ui.pointer_coordinate()
            });

        self.hovered = response
            .inner
            .and_then(|p| region_at(map, Point::new(p.x, p.y)));
    }
}

fn hover_text(region: &MapRegion) -> String {
    let value = region
        .value
        .map(format_value)
        .unwrap_or_else(|| "no data".to_string());
    format!("{}: {}", region.id, value)
}

/// Index of the region containing a point.
fn region_at(map: &ChoroplethMap, point: Point<f64>) -> Option<usize> {
    map.regions
        .iter()
        .position(|region| region.geometry.contains(&point))
}
