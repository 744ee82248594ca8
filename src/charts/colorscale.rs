//! Color Scale Module
//! Continuous color scales and value classification for choropleth fills.

use serde::Deserialize;
use statrs::statistics::{Data, OrderStatistics};
use std::fmt;

/// Fill for regions without a value.
pub const NO_DATA: [u8; 3] = [200, 200, 200];

/// Named color scale, each defined by evenly spaced RGB stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScale {
    #[default]
    Viridis,
    Plasma,
    Cividis,
    Blues,
    Greens,
    Reds,
    YlOrRd,
}

impl ColorScale {
    pub const ALL: [ColorScale; 7] = [
        ColorScale::Viridis,
        ColorScale::Plasma,
        ColorScale::Cividis,
        ColorScale::Blues,
        ColorScale::Greens,
        ColorScale::Reds,
        ColorScale::YlOrRd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ColorScale::Viridis => "Viridis",
            ColorScale::Plasma => "Plasma",
            ColorScale::Cividis => "Cividis",
            ColorScale::Blues => "Blues",
            ColorScale::Greens => "Greens",
            ColorScale::Reds => "Reds",
            ColorScale::YlOrRd => "YlOrRd",
        }
    }

    fn stops(&self) -> &'static [[u8; 3]] {
        match self {
            ColorScale::Viridis => &[
                [68, 1, 84],
                [59, 82, 139],
                [33, 145, 140],
                [94, 201, 98],
                [253, 231, 37],
            ],
            ColorScale::Plasma => &[
                [13, 8, 135],
                [126, 3, 168],
                [204, 71, 120],
                [248, 149, 64],
                [240, 249, 33],
            ],
            ColorScale::Cividis => &[
                [0, 34, 78],
                [87, 93, 109],
                [124, 123, 120],
                [165, 156, 116],
                [254, 232, 56],
            ],
            ColorScale::Blues => &[
                [239, 243, 255],
                [189, 215, 231],
                [107, 174, 214],
                [49, 130, 189],
                [8, 81, 156],
            ],
            ColorScale::Greens => &[
                [237, 248, 233],
                [186, 228, 179],
                [116, 196, 118],
                [49, 163, 84],
                [0, 109, 44],
            ],
            ColorScale::Reds => &[
                [254, 229, 217],
                [252, 174, 145],
                [251, 106, 74],
                [222, 45, 38],
                [165, 15, 21],
            ],
            ColorScale::YlOrRd => &[
                [255, 255, 178],
                [254, 204, 92],
                [253, 141, 60],
                [240, 59, 32],
                [189, 0, 38],
            ],
        }
    }

    /// Interpolated color at `t` in [0, 1].
    pub fn sample(&self, t: f64) -> [u8; 3] {
        let stops = self.stops();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let scaled = t * (stops.len() - 1) as f64;
        let lower = scaled.floor() as usize;
        let upper = (lower + 1).min(stops.len() - 1);
        let frac = scaled - lower as f64;

        let mut rgb = [0u8; 3];
        for (i, channel) in rgb.iter_mut().enumerate() {
            let a = stops[lower][i] as f64;
            let b = stops[upper][i] as f64;
            *channel = (a + (b - a) * frac).round() as u8;
        }
        rgb
    }

    /// Plotly colorscale array: `[[position, "rgb(r,g,b)"], ...]`.
    pub fn plotly_stops(&self) -> Vec<(f64, String)> {
        let stops = self.stops();
        stops
            .iter()
            .enumerate()
            .map(|(i, [r, g, b])| {
                (
                    i as f64 / (stops.len() - 1) as f64,
                    format!("rgb({},{},{})", r, g, b),
                )
            })
            .collect()
    }
}

impl fmt::Display for ColorScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How values map onto the color scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Min-max normalization
    #[default]
    Linear,
    /// Equal-count classes
    Quantile(usize),
}

/// Maps values to colors for one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorMapper {
    pub scale: ColorScale,
    pub classification: Classification,
    pub min: f64,
    pub max: f64,
    /// Upper class bounds for quantile classification, ascending
    pub breaks: Vec<f64>,
}

impl ColorMapper {
    /// Fit to the finite values; `None` when there are none.
    pub fn fit(values: &[f64], scale: ColorScale, classification: Classification) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }

        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let breaks = match classification {
            Classification::Linear => Vec::new(),
            Classification::Quantile(classes) => {
                let classes = classes.max(2);
                let mut data = Data::new(finite);
                (1..=classes)
                    .map(|k| data.quantile(k as f64 / classes as f64))
                    .collect()
            }
        };

        Some(Self {
            scale,
            classification,
            min,
            max,
            breaks,
        })
    }

    /// Class index of a value under quantile classification.
    pub fn class_of(&self, value: f64) -> Option<usize> {
        if self.breaks.is_empty() || !value.is_finite() {
            return None;
        }
        let idx = self
            .breaks
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.breaks.len() - 1);
        Some(idx)
    }

    /// Position on the scale in [0, 1].
    pub fn position(&self, value: f64) -> f64 {
        if let Some(class) = self.class_of(value) {
            return class as f64 / (self.breaks.len() - 1) as f64;
        }
        let span = self.max - self.min;
        if span <= 0.0 {
            0.0
        } else {
            ((value - self.min) / span).clamp(0.0, 1.0)
        }
    }

    pub fn color_for(&self, value: Option<f64>) -> [u8; 3] {
        match value {
            Some(v) if v.is_finite() => self.scale.sample(self.position(v)),
            _ => NO_DATA,
        }
    }

    /// Legend entries: (color, label) from low to high.
    pub fn legend(&self, linear_steps: usize) -> Vec<([u8; 3], String)> {
        if self.breaks.is_empty() {
            let steps = linear_steps.max(2);
            return (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    let value = self.min + (self.max - self.min) * t;
                    (self.scale.sample(t), format_value(value))
                })
                .collect();
        }

        let n = self.breaks.len();
        self.breaks
            .iter()
            .enumerate()
            .map(|(i, &upper)| {
                let lower = if i == 0 { self.min } else { self.breaks[i - 1] };
                let t = i as f64 / (n - 1) as f64;
                (
                    self.scale.sample(t),
                    format!("{} – {}", format_value(lower), format_value(upper)),
                )
            })
            .collect()
    }
}

/// Compact label for a legend value.
pub fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1e6 {
        format!("{:.2e}", value)
    } else if magnitude >= 100.0 || value.fract() == 0.0 {
        format!("{:.0}", value)
    } else if magnitude >= 1.0 {
        format!("{:.2}", value)
    } else {
        format!("{:.3}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_hits_endpoints_and_interpolates() {
        assert_eq!(ColorScale::Viridis.sample(0.0), [68, 1, 84]);
        assert_eq!(ColorScale::Viridis.sample(1.0), [253, 231, 37]);
        assert_eq!(ColorScale::Viridis.sample(2.0), [253, 231, 37]);
        assert_eq!(ColorScale::Blues.sample(0.125), [214, 229, 243]);
    }

    #[test]
    fn linear_mapper_normalizes_min_max() {
        let mapper =
            ColorMapper::fit(&[10.0, 20.0, f64::NAN, 30.0], ColorScale::Reds, Classification::Linear)
                .unwrap();
        assert_eq!(mapper.min, 10.0);
        assert_eq!(mapper.max, 30.0);
        assert_eq!(mapper.position(20.0), 0.5);
        assert_eq!(mapper.color_for(Some(10.0)), ColorScale::Reds.sample(0.0));
        assert_eq!(mapper.color_for(None), NO_DATA);
        assert_eq!(mapper.color_for(Some(f64::NAN)), NO_DATA);
    }

    #[test]
    fn constant_values_do_not_divide_by_zero() {
        let mapper =
            ColorMapper::fit(&[5.0, 5.0], ColorScale::Viridis, Classification::Linear).unwrap();
        assert_eq!(mapper.position(5.0), 0.0);
    }

    #[test]
    fn no_finite_values_cannot_fit() {
        assert!(ColorMapper::fit(&[f64::NAN], ColorScale::Viridis, Classification::Linear).is_none());
        assert!(ColorMapper::fit(&[], ColorScale::Viridis, Classification::Linear).is_none());
    }

    #[test]
    fn quantile_classes_span_the_scale() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let mapper =
            ColorMapper::fit(&values, ColorScale::Viridis, Classification::Quantile(4)).unwrap();

        assert_eq!(mapper.breaks.len(), 4);
        assert_eq!(mapper.class_of(1.0), Some(0));
        assert_eq!(mapper.class_of(100.0), Some(3));
        assert_eq!(mapper.color_for(Some(1.0)), ColorScale::Viridis.sample(0.0));
        assert_eq!(mapper.color_for(Some(100.0)), ColorScale::Viridis.sample(1.0));

        let legend = mapper.legend(5);
        assert_eq!(legend.len(), 4);
        assert!(legend[0].1.starts_with("1 –"));
        assert!(legend[3].1.ends_with("100"));
    }

    #[test]
    fn plotly_stops_are_normalized() {
        let stops = ColorScale::Viridis.plotly_stops();
        assert_eq!(stops.first().unwrap().0, 0.0);
        assert_eq!(stops.last().unwrap().0, 1.0);
        assert_eq!(stops[0].1, "rgb(68,1,84)");
    }

    #[test]
    fn deserializes_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            scale: ColorScale,
            classification: Classification,
        }

        let parsed: Wrapper =
            toml::from_str("scale = \"ylorrd\"\nclassification = { quantile = 5 }").unwrap();
        assert_eq!(parsed.scale, ColorScale::YlOrRd);
        assert_eq!(parsed.classification, Classification::Quantile(5));
    }
}
