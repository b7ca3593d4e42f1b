//! Statistical functions: mean, median, MAD, percentiles, sigma-clipped statistics.
//!
//! Aggregates skip non-finite samples instead of propagating NaN/Inf.

/// MAD (Median Absolute Deviation) to standard deviation conversion factor.
///
/// For a normal distribution, σ ≈ 1.4826 × MAD.
pub const MAD_TO_SIGMA: f32 = 1.4826022;

/// Convert MAD to standard deviation (assuming normal distribution).
#[inline]
pub fn mad_to_sigma(mad: f32) -> f32 {
    mad * MAD_TO_SIGMA
}

/// Mean of the finite samples, or `None` if there are none.
pub fn finite_mean(values: &[f32]) -> Option<f32> {
    mean_where(values, |v| v.is_finite())
}

/// Mean of the finite, strictly positive samples, or `None` if there are none.
pub fn positive_mean(values: &[f32]) -> Option<f32> {
    mean_where(values, |v| v.is_finite() && v > 0.0)
}

#[inline]
fn mean_where(values: &[f32], keep: impl Fn(f32) -> bool) -> Option<f32> {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for &v in values {
        if keep(v) {
            sum += v as f64;
            count += 1;
        }
    }
    (count > 0).then(|| (sum / count as f64) as f32)
}

/// Calculate the median of f32 values in-place.
///
/// Mutates the input buffer (partial sort via quickselect). Input must be
/// non-empty and free of NaN.
#[inline]
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;

    if len & 1 == 1 {
        let (_, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
        *median
    } else {
        let (left_part, right_median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
        let right = *right_median;
        let left = left_part.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (left + right) * 0.5
    }
}

/// Fast approximate median: upper-middle element for even lengths.
#[inline]
fn median_f32_approx(data: &mut [f32]) -> f32 {
    debug_assert!(!data.is_empty());

    let mid = data.len() / 2;
    let (_, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
    *median
}

#[inline]
fn abs_deviation_inplace(values: &mut [f32], median: f32) {
    for v in values.iter_mut() {
        *v = (*v - median).abs();
    }
}

/// Compute median and MAD together. Mutates the input buffer.
pub fn median_and_mad_f32_mut(data: &mut [f32]) -> (f32, f32) {
    debug_assert!(!data.is_empty());

    let median = median_f32_mut(data);
    abs_deviation_inplace(data, median);
    let mad = median_f32_mut(data);

    (median, mad)
}

/// Value at fraction `p` ∈ [0, 1] of an ascending-sorted slice, with linear
/// interpolation between neighbouring order statistics.
pub fn percentile_sorted(sorted: &[f32], p: f32) -> f32 {
    debug_assert!(!sorted.is_empty());
    debug_assert!(sorted.windows(2).all(|w| w[0] <= w[1]));

    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = pos - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Compute sigma-clipped median and MAD-based sigma.
///
/// Iteratively rejects outliers beyond `kappa × sigma` from the median.
/// `deviations` is a scratch buffer reused between calls.
///
/// # Returns
/// Tuple of (median, sigma) after clipping
pub fn sigma_clipped_median_mad(
    values: &mut [f32],
    deviations: &mut Vec<f32>,
    kappa: f32,
    iterations: usize,
) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    let mut len = values.len();
    deviations.resize(len, 0.0);

    for _ in 0..iterations {
        if len < 3 {
            break;
        }

        let active = &mut values[..len];
        let median = median_f32_approx(active);

        deviations[..len].copy_from_slice(active);
        abs_deviation_inplace(&mut deviations[..len], median);
        let sigma = mad_to_sigma(median_f32_approx(&mut deviations[..len]));

        if sigma < f32::EPSILON {
            return (median, 0.0);
        }

        // Clip using the deviations computed before the quickselect reorder
        deviations[..len].copy_from_slice(&values[..len]);
        let threshold = kappa * sigma;
        let mut write_idx = 0;
        for i in 0..len {
            let v = deviations[i];
            if (v - median).abs() <= threshold {
                values[write_idx] = v;
                write_idx += 1;
            }
        }

        if write_idx == len {
            return (median, sigma);
        }
        len = write_idx;
    }

    let active = &mut values[..len];
    let median = median_f32_mut(active);
    deviations[..len].copy_from_slice(active);
    abs_deviation_inplace(&mut deviations[..len], median);
    let sigma = mad_to_sigma(median_f32_mut(&mut deviations[..len]));

    (median, sigma)
}

#[cfg(test)]
mod tests;
