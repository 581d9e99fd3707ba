//! Video/audio filter descriptors and the textual filter graph handed to
//! FFmpeg. Filters render themselves; a no-op configuration renders empty
//! and is skipped by the graph.

use serde::{Deserialize, Serialize};

use crate::units::Resolution;

/// Rounds to four decimals so rendered arguments stay stable across
/// float round-trips.
fn fmt_f64(v: f64) -> String {
    let rounded = (v * 10_000.0).round() / 10_000.0;
    format!("{}", rounded)
}

/// One of the eight hflip/vflip/transpose compositions selectable in the
/// rotation control, by ordinal 0-7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RotationTransform {
    None,
    Rotate90,
    Rotate180,
    Rotate270,
    Mirror,
    MirrorRotate90,
    MirrorRotate180,
    MirrorRotate270,
}

impl RotationTransform {
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Some(match ordinal {
            0 => Self::None,
            1 => Self::Rotate90,
            2 => Self::Rotate180,
            3 => Self::Rotate270,
            4 => Self::Mirror,
            5 => Self::MirrorRotate90,
            6 => Self::MirrorRotate180,
            7 => Self::MirrorRotate270,
            _ => return None,
        })
    }

    fn render(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Rotate90 => "transpose=1",
            Self::Rotate180 => "hflip,vflip",
            Self::Rotate270 => "transpose=2",
            Self::Mirror => "hflip",
            Self::MirrorRotate90 => "transpose=3",
            Self::MirrorRotate180 => "vflip",
            Self::MirrorRotate270 => "transpose=0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FadeDirection {
    In,
    Out,
}

/// Maps a public [-1, +1] value onto `[min, max]` with an independent
/// linear segment on each side of `center`.
pub fn scale_to(v: f64, min: f64, max: f64, center: f64) -> f64 {
    if v < 0.0 {
        min + (center - min) * (v + 1.0)
    } else if v > 0.0 {
        center + (max - center) * v
    } else {
        center
    }
}

/// Inverse of [`scale_to`] over the same `(min, max, center)` triple.
pub fn scale_from(x: f64, min: f64, max: f64, center: f64) -> f64 {
    if x < center {
        -1.0 + (x - min) / (center - min)
    } else if x > center {
        (x - center) / (max - center)
    } else {
        0.0
    }
}

/// Domain triples `(min, max, center)` of the eq filter parameters.
const CONTRAST_DOMAIN: (f64, f64, f64) = (0.0, 2.0, 1.0);
const BRIGHTNESS_DOMAIN: (f64, f64, f64) = (-1.0, 1.0, 0.0);
const SATURATION_DOMAIN: (f64, f64, f64) = (0.0, 3.0, 1.0);
const GAMMA_DOMAIN: (f64, f64, f64) = (0.1, 10.0, 1.0);

/// Color equalizer settings. Values are stored on the eq filter's own
/// domain; the public accessors expose every property on [-1, +1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorAdjust {
    contrast: f64,
    brightness: f64,
    saturation: f64,
    gamma: f64,
    gamma_r: f64,
    gamma_g: f64,
    gamma_b: f64,
}

impl Default for ColorAdjust {
    fn default() -> Self {
        Self {
            contrast: CONTRAST_DOMAIN.2,
            brightness: BRIGHTNESS_DOMAIN.2,
            saturation: SATURATION_DOMAIN.2,
            gamma: GAMMA_DOMAIN.2,
            gamma_r: GAMMA_DOMAIN.2,
            gamma_g: GAMMA_DOMAIN.2,
            gamma_b: GAMMA_DOMAIN.2,
        }
    }
}

macro_rules! color_property {
    ($get:ident, $set:ident, $field:ident, $domain:expr) => {
        pub fn $get(&self) -> f64 {
            let (min, max, center) = $domain;
            scale_from(self.$field, min, max, center)
        }

        pub fn $set(&mut self, value: f64) {
            let (min, max, center) = $domain;
            self.$field = scale_to(value.clamp(-1.0, 1.0), min, max, center);
        }
    };
}

impl ColorAdjust {
    color_property!(contrast, set_contrast, contrast, CONTRAST_DOMAIN);
    color_property!(brightness, set_brightness, brightness, BRIGHTNESS_DOMAIN);
    color_property!(saturation, set_saturation, saturation, SATURATION_DOMAIN);
    color_property!(gamma, set_gamma, gamma, GAMMA_DOMAIN);
    color_property!(gamma_r, set_gamma_r, gamma_r, GAMMA_DOMAIN);
    color_property!(gamma_g, set_gamma_g, gamma_g, GAMMA_DOMAIN);
    color_property!(gamma_b, set_gamma_b, gamma_b, GAMMA_DOMAIN);

    fn render(&self) -> String {
        let mut parts = Vec::new();
        let props: [(&str, f64, f64); 7] = [
            ("contrast", self.contrast, CONTRAST_DOMAIN.2),
            ("brightness", self.brightness, BRIGHTNESS_DOMAIN.2),
            ("saturation", self.saturation, SATURATION_DOMAIN.2),
            ("gamma", self.gamma, GAMMA_DOMAIN.2),
            ("gamma_r", self.gamma_r, GAMMA_DOMAIN.2),
            ("gamma_g", self.gamma_g, GAMMA_DOMAIN.2),
            ("gamma_b", self.gamma_b, GAMMA_DOMAIN.2),
        ];
        for (name, value, center) in props {
            if (value - center).abs() > 1e-9 {
                parts.push(format!("{}={}", name, fmt_f64(value)));
            }
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("eq={}", parts.join(":"))
        }
    }
}

/// A single named video filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
pub enum Filter {
    /// Pixels removed from each edge. All-zero margins render nothing.
    Crop {
        left: u32,
        top: u32,
        right: u32,
        bottom: u32,
    },
    /// Target resolution. Unset dimensions render nothing.
    Scale { resolution: Resolution },
    Fps { rate: f64 },
    Rotation { transform: RotationTransform },
    ColorAdjust { settings: ColorAdjust },
    Fade {
        direction: FadeDirection,
        /// Fade length in seconds.
        duration: f64,
        /// Offset of the fade start within the clip, in seconds.
        start: f64,
    },
    GifPalette { per_frame: bool, max_colors: u32 },
}

impl Filter {
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Crop { .. } => "crop",
            Filter::Scale { .. } => "scale",
            Filter::Fps { .. } => "fps",
            Filter::Rotation { .. } => "rotate",
            Filter::ColorAdjust { .. } => "eq",
            Filter::Fade { .. } => "fade",
            Filter::GifPalette { .. } => "palette",
        }
    }

    /// The textual filter, or empty for a no-op configuration.
    pub fn render(&self) -> String {
        match self {
            Filter::Crop {
                left,
                top,
                right,
                bottom,
            } => {
                if *left == 0 && *top == 0 && *right == 0 && *bottom == 0 {
                    String::new()
                } else {
                    format!(
                        "crop=iw-{}:ih-{}:{}:{}",
                        left + right,
                        top + bottom,
                        left,
                        top
                    )
                }
            }
            Filter::Scale { resolution } => {
                if resolution.has_value() {
                    format!("scale={}:{}", resolution.width, resolution.height)
                } else {
                    String::new()
                }
            }
            Filter::Fps { rate } => format!("fps={}", fmt_f64(*rate)),
            Filter::Rotation { transform } => transform.render().to_string(),
            Filter::ColorAdjust { settings } => settings.render(),
            Filter::Fade {
                direction,
                duration,
                start,
            } => {
                let t = match direction {
                    FadeDirection::In => "in",
                    FadeDirection::Out => "out",
                };
                format!("fade=t={}:st={}:d={}", t, fmt_f64(*start), fmt_f64(*duration))
            }
            Filter::GifPalette {
                per_frame,
                max_colors,
            } => {
                if *per_frame {
                    format!(
                        "split[pg0][pg1];[pg0]palettegen=max_colors={}:stats_mode=single[plt];[pg1][plt]paletteuse=new=1",
                        max_colors
                    )
                } else {
                    format!(
                        "split[pg0][pg1];[pg0]palettegen=max_colors={}[plt];[pg1][plt]paletteuse",
                        max_colors
                    )
                }
            }
        }
    }
}

/// Filters grouped by `(input, stream)`, preserving per-key insertion
/// order, serialized as `[in:stream]f1,f2;[in:stream]f3`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filtergraph {
    groups: Vec<FilterGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterGroup {
    input: u32,
    stream: u32,
    filters: Vec<Filter>,
}

impl Filtergraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, input: u32, stream: u32, filter: Filter) {
        if let Some(group) = self
            .groups
            .iter_mut()
            .find(|g| g.input == input && g.stream == stream)
        {
            group.filters.push(filter);
        } else {
            self.groups.push(FilterGroup {
                input,
                stream,
                filters: vec![filter],
            });
        }
    }

    /// True when nothing would be rendered.
    pub fn is_empty(&self) -> bool {
        self.groups
            .iter()
            .all(|g| g.filters.iter().all(|f| f.render().is_empty()))
    }

    pub fn render(&self) -> String {
        let mut chains = Vec::new();
        for group in &self.groups {
            let rendered: Vec<String> = group
                .filters
                .iter()
                .map(|f| f.render())
                .filter(|r| !r.is_empty())
                .collect();
            if rendered.is_empty() {
                continue;
            }
            chains.push(format!(
                "[{}:{}]{}",
                group.input,
                group.stream,
                rendered.join(",")
            ));
        }
        chains.join(";")
    }
}
