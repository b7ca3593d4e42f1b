//! Math helpers shared by the pipeline stages.

pub mod statistics;

pub use statistics::{
    MAD_TO_SIGMA, finite_mean, mad_to_sigma, median_and_mad_f32_mut, median_f32_mut,
    percentile_sorted, positive_mean, sigma_clipped_median_mad,
};

/// FWHM of a Gaussian in units of its standard deviation: 2·√(2·ln 2).
pub const FWHM_PER_SIGMA: f32 = 2.354_820_0;
