//! Multi-layer compositing: blend library and the preview/full renderer.

pub mod blend;
pub mod color;
mod render;


use glam::Vec3;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::pixel_math::{PixelMathError, PixelMathProgram};

pub use blend::{BlendMode, blend, blend_scanline, composite_layer};
pub use color::ColorSpace;
pub use render::{render_composite, render_composite_blocking};

/// A mono layer with its compositing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeLayer {
    pub id: String,
    /// Row-major samples; layers of the wrong size are skipped.
    pub pixels: Vec<f32>,
    pub enabled: bool,
    /// Provides lightness instead of color.
    pub is_luminance: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// Per-channel RGB multipliers.
    pub tint: Vec3,
    pub skip_linear_match: bool,
    pub skip_brightness_balance: bool,
}

impl CompositeLayer {
    /// Enabled, opaque, untinted color layer in normal mode.
    pub fn new(id: impl Into<String>, pixels: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            pixels,
            enabled: true,
            is_luminance: false,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            tint: Vec3::ONE,
            skip_linear_match: false,
            skip_brightness_balance: false,
        }
    }

    pub fn luminance(id: impl Into<String>, pixels: Vec<f32>) -> Self {
        Self {
            is_luminance: true,
            ..Self::new(id, pixels)
        }
    }

    pub fn with_tint(mut self, tint: Vec3) -> Self {
        self.tint = tint;
        self
    }

    pub fn with_blend(mut self, blend_mode: BlendMode, opacity: f32) -> Self {
        self.blend_mode = blend_mode;
        self.opacity = opacity;
        self
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }
}

/// What the RGBA output shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    /// Composite RGB.
    #[default]
    Composite,
    /// One composite channel as gray.
    Channel(Channel),
    /// The luminance layer, or the composite's relative luminance without one.
    Luminance,
    /// Composite left of the split column, luminance right of it.
    Split,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RenderMode {
    /// Nearest-neighbor downsampled by `preview_scale`.
    #[default]
    Preview,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Normalize all color layers against one shared extent.
    pub linked_stretch: bool,
    pub auto_linear_match: bool,
    pub auto_brightness_balance: bool,
    pub color_space: ColorSpace,
    /// Applied after luminance integration when set.
    pub pixel_math: Option<PixelMathProgram>,
    /// Split column as a fraction of the width, in [0, 1].
    pub split_position: f32,
    /// Preview downsampling factor in (0, 1].
    pub preview_scale: f32,
    pub display: DisplayMode,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            linked_stretch: false,
            auto_linear_match: false,
            auto_brightness_balance: false,
            color_space: ColorSpace::Hsl,
            pixel_math: None,
            split_position: 0.5,
            preview_scale: 0.5,
            display: DisplayMode::Composite,
        }
    }
}

/// Borrowed input of one render call.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub layers: &'a [CompositeLayer],
    pub width: usize,
    pub height: usize,
    pub options: RenderOptions,
    pub mode: RenderMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    /// `4 · width · height` bytes, alpha always 255.
    pub rgba: Vec<u8>,
    /// Displayed channels before 8-bit conversion.
    pub red: Vec<f32>,
    pub green: Vec<f32>,
    pub blue: Vec<f32>,
    /// Normalized luminance layer, when one contributed.
    pub luminance: Option<Vec<f32>>,
    pub width: usize,
    pub height: usize,
    /// Set when pixel math failed; the channels are then pre-pixel-math.
    pub pixel_math_error: Option<PixelMathError>,
}
