//! Charts module - Choropleth building and rendering backends

mod choropleth;
mod colorscale;
mod plotly;
mod renderer;

pub use choropleth::{
    ChoroplethBuilder, ChoroplethMap, ChoroplethSpec, MapBackend, MapRegion, MapStyle, RenderError,
};
pub use colorscale::{format_value, Classification, ColorMapper, ColorScale};
pub use plotly::PlotlyHtmlRenderer;
pub use renderer::StaticMapRenderer;
