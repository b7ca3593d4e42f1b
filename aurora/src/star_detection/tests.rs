//! End-to-end detection tests on synthetic fields.

use super::*;
use crate::testing::{
    SyntheticStar, add_gaussian_noise, init_tracing, render_stars, scattered_stars,
};

/// Match detections to ground truth within `radius`, greedily by distance.
/// Returns (truth index, detection index) pairs.
fn match_stars(truth: &[SyntheticStar], found: &[Star], radius: f32) -> Vec<(usize, usize)> {
    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for (t, s) in truth.iter().enumerate() {
        for (d, f) in found.iter().enumerate() {
            let dist_sq = f.distance_sq(s.x, s.y);
            if dist_sq <= radius * radius {
                candidates.push((dist_sq, t, d));
            }
        }
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut used_t = vec![false; truth.len()];
    let mut used_d = vec![false; found.len()];
    let mut pairs = Vec::new();
    for (_, t, d) in candidates {
        if !used_t[t] && !used_d[d] {
            used_t[t] = true;
            used_d[d] = true;
            pairs.push((t, d));
        }
    }
    pairs
}

#[test]
fn test_border_margin_excludes_edge_star() {
    let pixels = render_stars(
        40,
        40,
        10.0,
        &[
            SyntheticStar::new(20.0, 20.0, 200.0, 1.5),
            SyntheticStar::new(38.5, 20.0, 200.0, 1.5),
        ],
    );
    let config = StarDetectionConfig {
        border_margin: 8,
        ..Default::default()
    };
    let stars = detect_stars(&pixels, 40, 40, &config).unwrap();

    assert_eq!(stars.len(), 1, "{stars:?}");
    assert!(stars[0].distance_sq(20.0, 20.0) < 1.0, "{:?}", stars[0]);
}

#[test]
fn test_accurate_profile_quality_on_synthetic_field() {
    init_tracing();

    let width = 256;
    let height = 256;
    let truth = scattered_stars(width, height, 24, 16.0, 42);
    let mut pixels = render_stars(width, height, 100.0, &truth);
    add_gaussian_noise(&mut pixels, 5.0, 1234);

    let found = detect_stars(&pixels, width, height, &StarDetectionConfig::accurate()).unwrap();
    let pairs = match_stars(&truth, &found, 2.0);

    let precision = pairs.len() as f32 / found.len().max(1) as f32;
    let recall = pairs.len() as f32 / truth.len() as f32;
    assert!(precision >= 0.9, "precision {precision} ({} found)", found.len());
    assert!(recall >= 0.9, "recall {recall}");

    let mut centroid_errors: Vec<f32> = pairs
        .iter()
        .map(|&(t, d)| found[d].distance_sq(truth[t].x, truth[t].y).sqrt())
        .collect();
    centroid_errors.sort_by(f32::total_cmp);
    let p95 = centroid_errors[((centroid_errors.len() as f32 * 0.95).ceil() as usize - 1)
        .min(centroid_errors.len() - 1)];
    assert!(p95 <= 0.6, "p95 centroid error {p95}");

    let mut fwhm_errors: Vec<f32> = pairs
        .iter()
        .map(|&(t, d)| (found[d].fwhm - truth[t].fwhm()).abs() / truth[t].fwhm())
        .collect();
    let median_fwhm_error = crate::math::median_f32_mut(&mut fwhm_errors);
    assert!(median_fwhm_error <= 0.2, "median relative FWHM error {median_fwhm_error}");
}

#[test]
fn test_accurate_profile_deblends_unequal_pair() {
    let width = 64;
    let height = 48;
    let truth = [
        SyntheticStar::new(27.0, 24.0, 800.0, 1.8),
        SyntheticStar::new(34.0, 24.5, 300.0, 1.8),
    ];
    let mut pixels = render_stars(width, height, 100.0, &truth);
    add_gaussian_noise(&mut pixels, 3.0, 9);

    let merged = detect_stars(&pixels, width, height, &StarDetectionConfig::legacy()).unwrap();
    assert_eq!(merged.len(), 1, "legacy keeps the blend as one object");

    let stars = detect_stars(&pixels, width, height, &StarDetectionConfig::accurate()).unwrap();
    assert_eq!(stars.len(), 2, "{stars:?}");
    let pairs = match_stars(&truth, &stars, 1.0);
    assert_eq!(pairs.len(), 2);
    // Brightest first
    assert!(stars[0].distance_sq(27.0, 24.0) < 1.0);
}

#[test]
fn test_eight_connectivity_never_yields_more_components() {
    let width = 64;
    let height = 64;
    let truth = [
        SyntheticStar::new(16.0, 16.0, 300.0, 1.5),
        SyntheticStar::new(47.5, 15.2, 220.0, 1.3),
        SyntheticStar::new(17.3, 46.8, 500.0, 1.8),
        SyntheticStar::new(46.1, 48.4, 260.0, 1.6),
    ];
    let mut pixels = render_stars(width, height, 20.0, &truth);
    add_gaussian_noise(&mut pixels, 2.0, 17);

    let four = detect_stars(&pixels, width, height, &StarDetectionConfig::default()).unwrap();
    let eight = StarDetectionConfig {
        connectivity: Connectivity::Eight,
        ..Default::default()
    };
    let eight = detect_stars(&pixels, width, height, &eight).unwrap();
    assert!(eight.len() <= four.len());
    assert_eq!(four.len(), truth.len());
}

#[test]
fn test_profile_names_round_trip() {
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    for profile in DetectionProfile::iter() {
        let name = profile.to_string();
        assert_eq!(DetectionProfile::from_str(&name).unwrap(), profile);
    }
    assert_eq!(DetectionProfile::Accurate.to_string(), "accurate");

    let json = serde_json::to_string(&StarDetectionConfig::accurate()).unwrap();
    let parsed: StarDetectionConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, StarDetectionConfig::accurate());
}

#[test]
#[should_panic(expected = "min_area")]
fn test_validate_rejects_inverted_area_limits() {
    StarDetectionConfig {
        min_area: 10,
        max_area: 5,
        ..Default::default()
    }
    .validate();
}
