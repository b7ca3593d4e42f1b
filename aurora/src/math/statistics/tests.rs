//! Tests for statistical functions.

use super::*;

// ---------------------------------------------------------------------------
// Mean tests
// ---------------------------------------------------------------------------

#[test]
fn test_finite_mean_skips_non_finite() {
    let values = [1.0f32, f32::NAN, 3.0, f32::INFINITY];
    assert!((finite_mean(&values).unwrap() - 2.0).abs() < 1e-6);
}

#[test]
fn test_finite_mean_empty() {
    assert!(finite_mean(&[]).is_none());
    assert!(finite_mean(&[f32::NAN]).is_none());
}

#[test]
fn test_positive_mean_skips_non_positive() {
    let values = [2.0f32, 0.0, -4.0, 4.0, f32::NAN];
    assert!((positive_mean(&values).unwrap() - 3.0).abs() < 1e-6);
    assert!(positive_mean(&[0.0, -1.0]).is_none());
}

// ---------------------------------------------------------------------------
// Median tests
// ---------------------------------------------------------------------------

#[test]
fn test_median_odd() {
    let mut values = [1.0f32, 3.0, 2.0, 5.0, 4.0];
    assert!((median_f32_mut(&mut values) - 3.0).abs() < f32::EPSILON);
}

#[test]
fn test_median_even() {
    let mut values = [1.0f32, 2.0, 3.0, 4.0];
    assert!((median_f32_mut(&mut values) - 2.5).abs() < f32::EPSILON);
}

#[test]
fn test_median_single() {
    let mut values = [42.0f32];
    assert!((median_f32_mut(&mut values) - 42.0).abs() < f32::EPSILON);
}

#[test]
fn test_median_and_mad_odd() {
    let mut values = [2.0f32, 4.0, 3.0];
    let (median, mad) = median_and_mad_f32_mut(&mut values);
    assert!((median - 3.0).abs() < 1e-6);
    assert!((mad - 1.0).abs() < 1e-6);
}

#[test]
fn test_median_and_mad_uniform() {
    let mut values = [3.5f32; 5];
    let (median, mad) = median_and_mad_f32_mut(&mut values);
    assert!((median - 3.5).abs() < 1e-6);
    assert!(mad.abs() < 1e-6);
}

// ---------------------------------------------------------------------------
// Percentile tests
// ---------------------------------------------------------------------------

#[test]
fn test_percentile_endpoints() {
    let sorted = [1.0f32, 2.0, 3.0, 4.0, 5.0];
    assert!((percentile_sorted(&sorted, 0.0) - 1.0).abs() < 1e-6);
    assert!((percentile_sorted(&sorted, 1.0) - 5.0).abs() < 1e-6);
    assert!((percentile_sorted(&sorted, 0.5) - 3.0).abs() < 1e-6);
}

#[test]
fn test_percentile_interpolates() {
    let sorted = [0.0f32, 10.0];
    assert!((percentile_sorted(&sorted, 0.1) - 1.0).abs() < 1e-5);
    assert!((percentile_sorted(&sorted, 0.9) - 9.0).abs() < 1e-5);
}

// ---------------------------------------------------------------------------
// Sigma-clipped median/MAD tests
// ---------------------------------------------------------------------------

#[test]
fn test_sigma_clipped_empty_input() {
    let mut values: [f32; 0] = [];
    let mut scratch = Vec::new();
    assert_eq!(
        sigma_clipped_median_mad(&mut values, &mut scratch, 3.0, 3),
        (0.0, 0.0)
    );
}

#[test]
fn test_sigma_clipped_rejects_outlier() {
    let mut values: Vec<f32> = (0..100).map(|i| 10.0 + (i % 5) as f32 * 0.1).collect();
    values.push(1000.0);
    let mut scratch = Vec::new();
    let (median, sigma) = sigma_clipped_median_mad(&mut values, &mut scratch, 3.0, 5);
    assert!((median - 10.2).abs() < 0.11, "median {median}");
    assert!(sigma < 1.0, "outlier should not inflate sigma: {sigma}");
}

#[test]
fn test_sigma_clipped_constant() {
    let mut values = [5.0f32; 16];
    let mut scratch = Vec::new();
    let (median, sigma) = sigma_clipped_median_mad(&mut values, &mut scratch, 3.0, 3);
    assert!((median - 5.0).abs() < 1e-6);
    assert_eq!(sigma, 0.0);
}
