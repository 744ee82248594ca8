//! GUI module - Interactive map viewer

mod app;
mod control_panel;
mod map_viewer;

pub use app::InteractiveViewer;
pub use control_panel::{ControlPanel, ControlPanelAction};
pub use map_viewer::MapViewer;
