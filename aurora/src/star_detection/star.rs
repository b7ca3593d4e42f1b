//! Star detection result types.

use serde::{Deserialize, Serialize};

/// A detected star with sub-pixel position and shape metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Star {
    /// X coordinate (sub-pixel accurate).
    pub x: f32,
    /// Y coordinate (sub-pixel accurate).
    pub y: f32,
    /// Number of pixels attributed to this object.
    pub area: usize,
    /// Total flux (sum of background-subtracted pixel values).
    pub flux: f32,
    /// Full Width at Half Maximum in pixels.
    pub fwhm: f32,
    /// 1 - b/a of the second-moment ellipse (0 = circular).
    pub ellipticity: f32,
    /// Signal-to-noise ratio.
    pub snr: f32,
    /// Background-subtracted peak pixel value.
    pub peak: f32,
}

impl Star {
    /// Squared distance to a point.
    #[inline]
    pub fn distance_sq(&self, x: f32, y: f32) -> f32 {
        let dx = self.x - x;
        let dy = self.y - y;
        dx * dx + dy * dy
    }
}

/// Sort brightest first; equal flux falls back to row-major position.
pub fn sort_by_flux(stars: &mut [Star]) {
    stars.sort_by(|a, b| {
        b.flux
            .total_cmp(&a.flux)
            .then(a.y.total_cmp(&b.y))
            .then(a.x.total_cmp(&b.x))
    });
}
