//! GeoChart Viewer Application
//! Main window with control panel and map viewer.

use crate::charts::{ChoroplethMap, MapBackend, PlotlyHtmlRenderer, RenderError, StaticMapRenderer};
use crate::gui::{ControlPanel, ControlPanelAction, MapViewer};
use eframe::egui;
use egui::SidePanel;
use tracing::{info, warn};

/// Main application window.
pub struct MapApp {
    map: ChoroplethMap,
    control_panel: ControlPanel,
    map_viewer: MapViewer,
    png_width: u32,
    mapbox_token: Option<String>,
}

impl MapApp {
    pub fn new(map: ChoroplethMap, png_width: u32, mapbox_token: Option<String>) -> Self {
        let mut map_viewer = MapViewer::new();
        map_viewer.set_map(&map);
        Self {
            control_panel: ControlPanel::new(&map),
            map,
            map_viewer,
            png_width,
            mapbox_token,
        }
    }

    fn handle_restyle(&mut self) {
        let settings = &self.control_panel.settings;
        self.map.opacity = settings.opacity;
        self.map
            .restyle(settings.color_scale, settings.classification());
        self.map_viewer.show_outlines = settings.show_outlines;
        self.map_viewer.recolor(&self.map);
    }

    fn handle_export_png(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("PNG Image", &["png"])
            .set_file_name("map.png")
            .save_file()
        else {
            return; // User cancelled
        };

        let renderer = StaticMapRenderer::new(path, self.png_width);
        self.export(&renderer);
    }

    fn handle_export_html(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("HTML Page", &["html"])
            .set_file_name("map.html")
            .save_file()
        else {
            return;
        };

        let renderer = PlotlyHtmlRenderer::new(path, self.mapbox_token.clone());
        self.export(&renderer);
    }

    fn export(&mut self, backend: &dyn MapBackend) {
        match backend.render(&self.map) {
            Ok(()) => self
                .control_panel
                .set_status(&format!("Exported {}", backend.name())),
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "export failed");
                self.control_panel.set_status(&format!("Error: {}", e));
            }
        }
    }
}

impl eframe::App for MapApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Left panel - Control Panel
        SidePanel::left("control_panel")
            .min_width(260.0)
            .max_width(320.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    let action = self.control_panel.show(ui, &self.map);

                    match action {
                        ControlPanelAction::Restyle => self.handle_restyle(),
                        ControlPanelAction::ExportPng => self.handle_export_png(),
                        ControlPanelAction::ExportHtml => self.handle_export_html(),
                        ControlPanelAction::None => {}
                    }
                });
            });

        // Central panel - Map Viewer
        egui::CentralPanel::default().show(ctx, |ui| {
            self.map_viewer.show(ui, &self.map);
        });
    }
}

/// Opens the map in a native window; returns when the window closes.
pub struct InteractiveViewer {
    pub png_width: u32,
    pub mapbox_token: Option<String>,
}

impl MapBackend for InteractiveViewer {
    fn name(&self) -> &'static str {
        "viewer"
    }

    fn render(&self, map: &ChoroplethMap) -> Result<(), RenderError> {
        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([1400.0, 800.0])
                .with_min_inner_size([900.0, 600.0])
                .with_title(format!("GeoChart - {}", map.title())),
            ..Default::default()
        };

        let map = map.clone();
        let png_width = self.png_width;
        let mapbox_token = self.mapbox_token.clone();

        info!(regions = map.regions.len(), "opening viewer");
        eframe::run_native(
            "GeoChart",
            options,
            Box::new(move |_cc| Ok(Box::new(MapApp::new(map, png_width, mapbox_token)))),
        )
        .map_err(|e| RenderError::Viewer(e.to_string()))
    }
}
