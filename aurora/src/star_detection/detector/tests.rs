//! Tests for the detection pipeline helpers and the async entry point.

use std::sync::{Arc, Mutex};

use super::*;
use crate::testing::{SyntheticStar, add_gaussian_noise, render_stars};

// =============================================================================
// Helper Functions
// =============================================================================

fn make_star(x: f32, y: f32, flux: f32) -> Star {
    Star {
        x,
        y,
        area: 20,
        flux,
        fwhm: 3.0,
        ellipticity: 0.1,
        snr: 50.0,
        peak: 100.0,
    }
}

fn small_field() -> (Vec<f32>, usize, usize) {
    let width = 96;
    let height = 80;
    let mut pixels = render_stars(
        width,
        height,
        50.0,
        &[
            SyntheticStar::new(20.5, 18.2, 400.0, 1.6),
            SyntheticStar::new(70.1, 25.7, 250.0, 1.9),
            SyntheticStar::new(45.3, 60.4, 600.0, 1.4),
            SyntheticStar::new(80.0, 70.0, 300.0, 2.0),
        ],
    );
    add_gaussian_noise(&mut pixels, 3.0, 5);
    (pixels, width, height)
}

// =============================================================================
// Filters
// =============================================================================

#[test]
fn test_inside_border() {
    assert!(inside_border(&make_star(20.0, 20.0, 1.0), 40, 40, 8));
    assert!(!inside_border(&make_star(7.9, 20.0, 1.0), 40, 40, 8));
    assert!(!inside_border(&make_star(20.0, 31.5, 1.0), 40, 40, 8));
    assert!(inside_border(&make_star(0.0, 39.0, 1.0), 40, 40, 0));
}

#[test]
fn test_shape_filter() {
    let config = StarDetectionConfig {
        max_ellipticity: Some(0.5),
        filter_fwhm: Some(1.5),
        max_fwhm: Some(6.0),
        ..StarDetectionConfig::accurate()
    };
    assert!(passes_shape_filter(&make_star(0.0, 0.0, 1.0), &config));

    let elongated = Star {
        ellipticity: 0.7,
        ..make_star(0.0, 0.0, 1.0)
    };
    assert!(!passes_shape_filter(&elongated, &config));

    let tiny = Star {
        fwhm: 1.0,
        ..make_star(0.0, 0.0, 1.0)
    };
    assert!(!passes_shape_filter(&tiny, &config));

    let bloated = Star {
        fwhm: 9.0,
        ..make_star(0.0, 0.0, 1.0)
    };
    assert!(!passes_shape_filter(&bloated, &config));
}

#[test]
fn test_sort_by_flux_breaks_ties_by_position() {
    let mut stars = vec![
        make_star(5.0, 9.0, 10.0),
        make_star(3.0, 2.0, 50.0),
        make_star(1.0, 9.0, 10.0),
        make_star(8.0, 1.0, 10.0),
    ];
    sort_by_flux(&mut stars);
    let order: Vec<(f32, f32)> = stars.iter().map(|s| (s.x, s.y)).collect();
    assert_eq!(order, vec![(3.0, 2.0), (8.0, 1.0), (1.0, 9.0), (5.0, 9.0)]);
}

// =============================================================================
// Entry points
// =============================================================================

#[test]
fn test_detect_rejects_wrong_length() {
    let err = detect_stars(&[0.0; 10], 4, 4, &StarDetectionConfig::default()).unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 16, actual: 10, .. }));
}

#[test]
fn test_uniform_frame_has_no_stars() {
    let pixels = vec![0.3f32; 32 * 32];
    let stars = detect_stars(&pixels, 32, 32, &StarDetectionConfig::default()).unwrap();
    assert!(stars.is_empty());
}

#[test]
fn test_omitted_profile_matches_legacy() {
    let (pixels, width, height) = small_field();
    let implicit = detect_stars(&pixels, width, height, &StarDetectionConfig::default()).unwrap();
    let explicit = detect_stars(&pixels, width, height, &StarDetectionConfig::legacy()).unwrap();
    assert_eq!(implicit.len(), 4);
    assert_eq!(implicit, explicit);
}

#[test]
fn test_max_stars_keeps_brightest() {
    let (pixels, width, height) = small_field();
    let all = detect_stars(&pixels, width, height, &StarDetectionConfig::default()).unwrap();
    let config = StarDetectionConfig {
        max_stars: Some(2),
        ..Default::default()
    };
    let top = detect_stars(&pixels, width, height, &config).unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[..], all[..2]);
    assert!(top[0].flux >= top[1].flux);
}

#[test]
fn test_detector_batch_matches_single() {
    let (pixels, width, height) = small_field();
    let detector = StarDetector::from_config(StarDetectionConfig::accurate());
    let single = detector.detect(&pixels, width, height).unwrap();
    let batch = detector.detect_all(&[&pixels, &pixels], width, height);
    assert_eq!(batch.len(), 2);
    for result in batch {
        assert_eq!(result.unwrap(), single);
    }
}

#[tokio::test]
async fn test_async_matches_sync_and_reports_progress() {
    let (pixels, width, height) = small_field();
    let config = StarDetectionConfig::accurate();
    let sync = detect_stars(&pixels, width, height, &config).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let options = AsyncDetectOptions {
        on_progress: SharedFn::from_fn({
            let seen = Arc::clone(&seen);
            move |p| seen.lock().unwrap().push(p)
        }),
        chunk_rows: 7,
        ..Default::default()
    };
    let stars = detect_stars_async(&pixels, width, height, &config, options)
        .await
        .unwrap();
    assert_eq!(stars, sync);

    let progress = seen.lock().unwrap().clone();
    // One report per chunk plus the final one
    assert_eq!(progress.len(), height.div_ceil(7) + 1);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(*progress.last().unwrap(), 1.0);
}

#[tokio::test]
async fn test_async_pre_cancelled_returns_cancelled() {
    let (pixels, width, height) = small_field();
    let cancel = CancelToken::new();
    cancel.cancel();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let options = AsyncDetectOptions {
        on_progress: SharedFn::from_fn({
            let seen = Arc::clone(&seen);
            move |p| seen.lock().unwrap().push(p)
        }),
        cancel,
        ..Default::default()
    };
    let err = detect_stars_async(&pixels, width, height, &StarDetectionConfig::default(), options)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_async_cancelled_mid_flight() {
    let (pixels, width, height) = small_field();
    let cancel = CancelToken::new();
    let options = AsyncDetectOptions {
        on_progress: SharedFn::from_fn({
            let cancel = cancel.clone();
            move |p| {
                if p > 0.3 {
                    cancel.cancel();
                }
            }
        }),
        chunk_rows: 8,
        cancel: cancel.clone(),
    };
    let result =
        detect_stars_async(&pixels, width, height, &StarDetectionConfig::default(), options).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}
