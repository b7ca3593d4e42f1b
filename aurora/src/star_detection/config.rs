//! Configuration types for star detection.
//!
//! [`StarDetectionConfig`] is a flat struct; fields are grouped by comments
//! into the pipeline stages they control.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

// ============================================================================
// Enums
// ============================================================================

/// Pixel connectivity for connected component labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Connectivity {
    /// Horizontal and vertical neighbors only. Matches SExtractor.
    #[default]
    Four,
    /// Includes diagonal neighbors. Merges close pairs more aggressively.
    Eight,
}

/// Preset detection strategy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DetectionProfile {
    /// Global median/MAD background, plain thresholding, intensity-weighted
    /// moments over the thresholded pixels.
    #[default]
    Legacy,
    /// Tiled background mesh, multi-threshold deblending, Gaussian-weighted
    /// adaptive moments and shape filtering.
    Accurate,
}

// ============================================================================
// Config
// ============================================================================

/// Star detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarDetectionConfig {
    /// Strategy preset. `None` behaves exactly like [`DetectionProfile::Legacy`].
    pub profile: Option<DetectionProfile>,

    // -- Background / threshold --
    /// Detection threshold in units of background noise.
    pub sigma_threshold: f32,
    /// Mesh cell size in pixels for the tiled background (accurate profile).
    pub tile_size: usize,

    // -- Components --
    pub connectivity: Connectivity,
    /// Minimum component area in pixels.
    pub min_area: usize,
    /// Maximum component area in pixels.
    pub max_area: usize,
    /// Stars whose centroid lies closer than this to an edge are rejected.
    pub border_margin: usize,

    // -- Deblending --
    /// Number of sub-thresholds between detection level and peak. 0 disables.
    pub deblend_n_levels: usize,
    /// Minimum flux fraction of the whole component a branch must hold to be
    /// split off as a separate object.
    pub deblend_min_contrast: f32,

    // -- Shape filtering --
    /// Reject detections with ellipticity above this.
    pub max_ellipticity: Option<f32>,
    /// Reject detections with FWHM below this.
    pub filter_fwhm: Option<f32>,
    /// Reject detections with FWHM above this.
    pub max_fwhm: Option<f32>,

    // -- Output --
    /// Keep only the brightest N detections.
    pub max_stars: Option<usize>,
}

impl Default for StarDetectionConfig {
    fn default() -> Self {
        Self {
            profile: None,
            sigma_threshold: 5.0,
            tile_size: 64,
            connectivity: Connectivity::Four,
            min_area: 3,
            max_area: 4096,
            border_margin: 0,
            deblend_n_levels: 0,
            deblend_min_contrast: 0.005,
            max_ellipticity: None,
            filter_fwhm: None,
            max_fwhm: None,
            max_stars: None,
        }
    }
}

impl StarDetectionConfig {
    /// Simple global thresholding. Same as [`Default`] with the profile spelled out.
    pub fn legacy() -> Self {
        Self {
            profile: Some(DetectionProfile::Legacy),
            ..Default::default()
        }
    }

    /// Mesh background, deblending and shape filtering.
    pub fn accurate() -> Self {
        Self {
            profile: Some(DetectionProfile::Accurate),
            sigma_threshold: 4.0,
            min_area: 5,
            border_margin: 8,
            deblend_n_levels: 32,
            deblend_min_contrast: 0.005,
            max_ellipticity: Some(0.6),
            filter_fwhm: Some(1.0),
            max_fwhm: Some(20.0),
            ..Default::default()
        }
    }

    /// Dense star fields: lower threshold, finer mesh, more deblending levels.
    pub fn crowded_field() -> Self {
        Self {
            sigma_threshold: 3.0,
            tile_size: 32,
            min_area: 4,
            deblend_n_levels: 64,
            deblend_min_contrast: 0.001,
            ..Self::accurate()
        }
    }

    /// Profile in effect; `None` resolves to legacy.
    #[inline]
    pub fn effective_profile(&self) -> DetectionProfile {
        self.profile.unwrap_or(DetectionProfile::Legacy)
    }

    #[inline]
    pub fn is_accurate(&self) -> bool {
        self.effective_profile() == DetectionProfile::Accurate
    }

    /// Panics on invalid parameters.
    pub fn validate(&self) {
        assert!(
            self.sigma_threshold.is_finite() && self.sigma_threshold > 0.0,
            "sigma_threshold must be positive, got {}",
            self.sigma_threshold
        );
        assert!(
            self.tile_size >= 8,
            "tile_size must be at least 8, got {}",
            self.tile_size
        );
        assert!(self.min_area >= 1, "min_area must be at least 1");
        assert!(
            self.min_area <= self.max_area,
            "min_area ({}) must be <= max_area ({})",
            self.min_area,
            self.max_area
        );
        assert!(
            (0.0..=1.0).contains(&self.deblend_min_contrast),
            "deblend_min_contrast must be in [0, 1], got {}",
            self.deblend_min_contrast
        );
        if let Some(max_ellipticity) = self.max_ellipticity {
            assert!(
                (0.0..=1.0).contains(&max_ellipticity),
                "max_ellipticity must be in [0, 1], got {}",
                max_ellipticity
            );
        }
        if let (Some(min), Some(max)) = (self.filter_fwhm, self.max_fwhm) {
            assert!(
                min <= max,
                "filter_fwhm ({}) must be <= max_fwhm ({})",
                min,
                max
            );
        }
    }
}
