//! Lightness conventions used when integrating a luminance layer.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Rec. 709 relative luminance weights.
pub const REC709_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Current lightness below this is treated as black: no rescaling.
const MIN_LIGHTNESS: f32 = 1e-6;

/// CIE L* curve constants.
const LSTAR_KAPPA: f32 = 903.3;
const LSTAR_KNEE: f32 = 8.0;

/// How lightness is measured when a luminance layer replaces it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ColorSpace {
    /// Relative-luminance weighted sum.
    #[default]
    Hsl,
    /// Maximum channel.
    Hsv,
    /// Relative luminance against a target mapped through the inverse L* curve.
    Lab,
}

#[inline]
pub fn relative_luminance(rgb: Vec3) -> f32 {
    rgb.dot(REC709_WEIGHTS)
}

/// Linear luminance Y for a lightness `l` = L*/100.
#[inline]
pub fn lstar_to_luminance(l: f32) -> f32 {
    let lstar = l * 100.0;
    if lstar > LSTAR_KNEE {
        ((lstar + 16.0) / 116.0).powi(3)
    } else {
        lstar / LSTAR_KAPPA
    }
}

impl ColorSpace {
    /// Lightness of an RGB value under this convention.
    #[inline]
    pub fn lightness(self, rgb: Vec3) -> f32 {
        match self {
            ColorSpace::Hsl | ColorSpace::Lab => relative_luminance(rgb),
            ColorSpace::Hsv => rgb.max_element(),
        }
    }

    /// Target lightness for a normalized luminance sample.
    #[inline]
    pub fn target(self, luminance: f32) -> f32 {
        match self {
            ColorSpace::Hsl | ColorSpace::Hsv => luminance,
            ColorSpace::Lab => lstar_to_luminance(luminance),
        }
    }

    /// Rescale `rgb` so its lightness matches `luminance`, blended by
    /// `opacity`. Near-black pixels keep their value.
    #[inline]
    pub fn integrate(self, rgb: Vec3, luminance: f32, opacity: f32) -> Vec3 {
        let current = self.lightness(rgb);
        let scale = if current > MIN_LIGHTNESS {
            self.target(luminance) / current
        } else {
            1.0
        };
        rgb * (1.0 - opacity) + rgb * scale * opacity
    }
}
