//! Inter-frame intensity matching.
//!
//! Two independent tools, both robust to outliers and non-finite samples:
//! - [`estimate_linear_match`] fits `reference ≈ scale · source + offset` from
//!   the 10th/90th percentile anchors of each buffer.
//! - [`estimate_brightness_gain`] computes a pure gain from the medians of
//!   co-located positive samples.


use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::math::{median_f32_mut, percentile_sorted};

/// Lower percentile anchor for the linear fit.
pub const LOW_PERCENTILE: f32 = 0.10;
/// Upper percentile anchor for the linear fit.
pub const HIGH_PERCENTILE: f32 = 0.90;
/// Below this source spread the fit falls back to a median ratio.
const MIN_SPREAD: f32 = 1e-6;
/// Minimum co-located positive samples for a brightness gain.
pub const MIN_BRIGHTNESS_SAMPLES: usize = 32;

// =============================================================================
// Linear match
// =============================================================================

/// Affine intensity transform `v · scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearMatch {
    pub scale: f32,
    pub offset: f32,
}

impl LinearMatch {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset: 0.0,
    };

    #[inline]
    pub fn apply(&self, v: f32) -> f32 {
        v * self.scale + self.offset
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for LinearMatch {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Fit `source` onto `reference` using percentile anchors.
///
/// Both buffers are sampled every `sample_step` elements (0 is treated as 1)
/// and sorted independently, so they need not be co-registered or equally
/// sized. Returns the identity when either side has no finite sample or the
/// fit is not finite.
pub fn estimate_linear_match(source: &[f32], reference: &[f32], sample_step: usize) -> LinearMatch {
    let mut src = strided_finite(source, sample_step);
    let mut reference = strided_finite(reference, sample_step);
    if src.is_empty() || reference.is_empty() {
        return LinearMatch::IDENTITY;
    }

    src.par_sort_unstable_by(f32::total_cmp);
    reference.par_sort_unstable_by(f32::total_cmp);

    let src_lo = percentile_sorted(&src, LOW_PERCENTILE);
    let src_hi = percentile_sorted(&src, HIGH_PERCENTILE);
    let ref_lo = percentile_sorted(&reference, LOW_PERCENTILE);
    let ref_hi = percentile_sorted(&reference, HIGH_PERCENTILE);

    let spread = src_hi - src_lo;
    let fit = if spread.abs() <= MIN_SPREAD {
        // Flat source: only a multiplicative match is meaningful
        let src_median = percentile_sorted(&src, 0.5);
        let ref_median = percentile_sorted(&reference, 0.5);
        LinearMatch {
            scale: ref_median / src_median,
            offset: 0.0,
        }
    } else {
        let scale = (ref_hi - ref_lo) / spread;
        LinearMatch {
            scale,
            offset: ref_lo - scale * src_lo,
        }
    };

    if fit.scale.is_finite() && fit.offset.is_finite() {
        tracing::debug!(
            "Linear match: scale {:.5}, offset {:.5}",
            fit.scale,
            fit.offset
        );
        fit
    } else {
        tracing::warn!("Linear match is not finite, using identity");
        LinearMatch::IDENTITY
    }
}

/// Apply `params` elementwise, optionally flooring results at 0.
pub fn apply_linear_match(source: &[f32], params: &LinearMatch, clamp_to_positive: bool) -> Vec<f32> {
    let params = *params;
    source
        .par_iter()
        .map(|&v| {
            let out = params.apply(v);
            if clamp_to_positive { out.max(0.0) } else { out }
        })
        .collect()
}

fn strided_finite(values: &[f32], step: usize) -> Vec<f32> {
    values
        .iter()
        .step_by(step.max(1))
        .copied()
        .filter(|v| v.is_finite())
        .collect()
}

// =============================================================================
// Brightness balance
// =============================================================================

/// Multiplicative gain bringing a layer's median to the reference's.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrightnessGain {
    pub gain: f32,
    pub reference_median: f32,
    pub layer_median: f32,
}

impl BrightnessGain {
    pub const NONE: Self = Self {
        gain: 1.0,
        reference_median: 0.0,
        layer_median: 0.0,
    };
}

/// Estimate `median(reference) / median(layer)` over co-located samples where
/// both are finite and strictly positive.
///
/// Samples are taken every `sample_step` pixels (0 is treated as 1) over the
/// common prefix of both buffers. With fewer than
/// [`MIN_BRIGHTNESS_SAMPLES`] pairs the gain is 1.
pub fn estimate_brightness_gain(layer: &[f32], reference: &[f32], sample_step: usize) -> BrightnessGain {
    let (mut layer_samples, mut reference_samples): (Vec<f32>, Vec<f32>) = layer
        .iter()
        .zip(reference)
        .step_by(sample_step.max(1))
        .filter(|&(&l, &r)| l.is_finite() && l > 0.0 && r.is_finite() && r > 0.0)
        .map(|(&l, &r)| (l, r))
        .unzip();

    if layer_samples.len() < MIN_BRIGHTNESS_SAMPLES {
        tracing::debug!(
            "Only {} positive sample pairs, brightness gain skipped",
            layer_samples.len()
        );
        return BrightnessGain::NONE;
    }

    let layer_median = median_f32_mut(&mut layer_samples);
    let reference_median = median_f32_mut(&mut reference_samples);
    let gain = reference_median / layer_median;

    BrightnessGain {
        gain: if gain.is_finite() { gain } else { 1.0 },
        reference_median,
        layer_median,
    }
}

/// Brightness-balanced copies of a layer stack.
#[derive(Debug, Clone, Default)]
pub struct BalancedLayers {
    pub balanced: Vec<Vec<f32>>,
    /// Gain applied to each layer; 1 for the reference.
    pub gains: Vec<f32>,
}

/// Scale every layer except `reference_index` by its brightness gain
/// against the reference layer.
///
/// # Panics
/// If `layers` is non-empty and `reference_index` is out of range.
pub fn balance_layer_brightness(
    layers: &[&[f32]],
    reference_index: usize,
    sample_step: usize,
) -> BalancedLayers {
    if layers.is_empty() {
        return BalancedLayers::default();
    }
    assert!(
        reference_index < layers.len(),
        "reference_index {reference_index} out of range for {} layers",
        layers.len()
    );

    let reference = layers[reference_index];
    let (balanced, gains) = layers
        .par_iter()
        .enumerate()
        .map(|(i, layer)| {
            if i == reference_index {
                return (layer.to_vec(), 1.0);
            }
            let gain = estimate_brightness_gain(layer, reference, sample_step).gain;
            (layer.iter().map(|v| v * gain).collect(), gain)
        })
        .unzip();

    BalancedLayers { balanced, gains }
}
