//! Control Panel Widget
//! Left side panel with styling controls, legend and export buttons.

use crate::charts::{Classification, ChoroplethMap, ColorMapper, ColorScale};
use egui::{Color32, ComboBox, RichText};

/// User-adjustable map styling.
#[derive(Clone, PartialEq)]
pub struct UserSettings {
    pub color_scale: ColorScale,
    pub quantile: bool,
    pub classes: usize,
    pub opacity: f64,
    pub show_outlines: bool,
}

impl UserSettings {
    pub fn from_map(map: &ChoroplethMap) -> Self {
        let (quantile, classes) = match map.mapper.classification {
            Classification::Linear => (false, 5),
            Classification::Quantile(n) => (true, n),
        };
        Self {
            color_scale: map.mapper.scale,
            quantile,
            classes,
            opacity: map.opacity,
            show_outlines: true,
        }
    }

    pub fn classification(&self) -> Classification {
        if self.quantile {
            Classification::Quantile(self.classes)
        } else {
            Classification::Linear
        }
    }
}

/// Left side control panel.
pub struct ControlPanel {
    pub settings: UserSettings,
    pub status: String,
}

impl ControlPanel {
    pub fn new(map: &ChoroplethMap) -> Self {
        Self {
            settings: UserSettings::from_map(map),
            status: format!("{} regions", map.regions.len()),
        }
    }

    /// Draw the control panel
    pub fn show(&mut self, ui: &mut egui::Ui, map: &ChoroplethMap) -> ControlPanelAction {
        let mut action = ControlPanelAction::None;
        let before = self.settings.clone();

        // Title
        ui.vertical_centered(|ui| {
            ui.add_space(5.0);
            ui.label(
                RichText::new("🗺 GeoChart")
                    .size(22.0)
                    .color(Color32::from_rgb(100, 149, 237)),
            );
            ui.label(RichText::new(&map.value_label).size(11.0).color(Color32::GRAY));
        });
        ui.add_space(10.0);
        ui.separator();
        ui.add_space(5.0);

        // ===== Style Section =====
        ui.label(RichText::new("🎨 Style").size(14.0).strong());
        ui.add_space(5.0);

        let label_width = 90.0;
        let combo_width = 150.0;

        ui.horizontal(|ui| {
            ui.add_sized([label_width, 20.0], egui::Label::new("Color Scale:"));
            ComboBox::from_id_salt("color_scale")
                .width(combo_width)
                .selected_text(self.settings.color_scale.name())
                .show_ui(ui, |ui| {
                    for scale in ColorScale::ALL {
                        ui.selectable_value(&mut self.settings.color_scale, scale, scale.name());
                    }
                });
        });

        ui.add_space(5.0);

        ui.horizontal(|ui| {
            ui.radio_value(&mut self.settings.quantile, false, "Linear");
            ui.radio_value(&mut self.settings.quantile, true, "Quantile");
        });
        ui.add_enabled_ui(self.settings.quantile, |ui| {
            ui.horizontal(|ui| {
                ui.add_sized([label_width, 20.0], egui::Label::new("Classes:"));
                ui.add(egui::DragValue::new(&mut self.settings.classes).range(2..=10));
            });
        });

        ui.add_space(5.0);

        ui.horizontal(|ui| {
            ui.add_sized([label_width, 20.0], egui::Label::new("Opacity:"));
            ui.add(egui::Slider::new(&mut self.settings.opacity, 0.0..=1.0));
        });
        ui.checkbox(&mut self.settings.show_outlines, "Region outlines");

        if self.settings != before {
            action = ControlPanelAction::Restyle;
        }

        ui.add_space(15.0);
        ui.separator();
        ui.add_space(10.0);

        // ===== Legend Section =====
        ui.label(RichText::new("📊 Legend").size(14.0).strong());
        ui.add_space(5.0);

        egui::Frame::none()
            .fill(ui.visuals().widgets.noninteractive.bg_fill)
            .rounding(5.0)
            .inner_margin(8.0)
            .show(ui, |ui| show_legend(ui, &map.mapper));

        ui.add_space(15.0);
        ui.separator();
        ui.add_space(10.0);

        // ===== Action Buttons =====
        ui.vertical_centered(|ui| {
            let png_button = egui::Button::new(RichText::new("🖼 Export PNG").size(14.0))
                .min_size(egui::vec2(150.0, 30.0));
            if ui.add(png_button).clicked() {
                action = ControlPanelAction::ExportPng;
            }

            ui.add_space(8.0);

            let html_button = egui::Button::new(RichText::new("🌐 Export HTML").size(14.0))
                .min_size(egui::vec2(150.0, 30.0));
            if ui.add(html_button).clicked() {
                action = ControlPanelAction::ExportHtml;
            }
        });

        ui.add_space(10.0);

        let status_color = if self.status.contains("Error") {
            Color32::from_rgb(220, 53, 69)
        } else if self.status.contains("Exported") {
            Color32::from_rgb(40, 167, 69)
        } else {
            Color32::GRAY
        };
        ui.label(RichText::new(&self.status).size(11.0).color(status_color));

        action
    }

    pub fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
    }
}

/// Color swatches, highest class on top.
fn show_legend(ui: &mut egui::Ui, mapper: &ColorMapper) {
    for ([r, g, b], label) in mapper.legend(6).into_iter().rev() {
        ui.horizontal(|ui| {
            let (rect, _) = ui.allocate_exact_size(egui::vec2(16.0, 16.0), egui::Sense::hover());
            ui.painter()
                .rect_filled(rect, 3.0, Color32::from_rgb(r, g, b));
            ui.label(RichText::new(label).size(12.0));
        });
    }
}

/// Actions triggered by control panel
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPanelAction {
    None,
    Restyle,
    ExportPng,
    ExportHtml,
}
