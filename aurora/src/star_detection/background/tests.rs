use super::*;
use crate::testing::add_gaussian_noise;

#[test]
fn test_global_uniform_frame_uses_fallback_noise() {
    let pixels = Buffer2::new_filled(16, 16, 0.25f32);
    let map = BackgroundMap::global(&pixels);
    assert!((map.background(0) - 0.25).abs() < 1e-6);
    assert_eq!(map.noise(0), FALLBACK_NOISE);
}

#[test]
fn test_global_ignores_non_finite() {
    let mut data = vec![10.0f32; 100];
    data[3] = f32::NAN;
    data[7] = f32::INFINITY;
    let map = BackgroundMap::global(&Buffer2::new(10, 10, data));
    assert!((map.background(0) - 10.0).abs() < 1e-6);
}

#[test]
fn test_global_noise_matches_gaussian_sigma() {
    let mut data = vec![100.0f32; 128 * 128];
    add_gaussian_noise(&mut data, 5.0, 7);
    let map = BackgroundMap::global(&Buffer2::new(128, 128, data));
    assert!((map.background(0) - 100.0).abs() < 0.3, "bg {}", map.background(0));
    assert!((map.noise(0) - 5.0).abs() < 0.3, "noise {}", map.noise(0));
}

#[test]
fn test_tiled_follows_gradient() {
    let width = 128;
    let height = 64;
    let data: Vec<f32> = (0..width * height)
        .map(|i| 50.0 + (i % width) as f32 * 0.5)
        .collect();
    let pixels = Buffer2::new(width, height, data);
    let map = BackgroundMap::tiled(&pixels, 32);

    // Inner cells survive the 3x3 median unchanged on a linear ramp
    for x in [50usize, 64, 75] {
        let idx = 30 * width + x;
        let expected = 50.0 + x as f32 * 0.5;
        assert!(
            (map.background(idx) - expected).abs() < 0.6,
            "x={x}: expected {expected}, got {}",
            map.background(idx)
        );
    }
}

#[test]
fn test_tiled_rejects_star_in_cell() {
    let mut data = vec![20.0f32; 64 * 64];
    add_gaussian_noise(&mut data, 1.0, 3);
    // Bright blob covering a few pixels of one cell
    for y in 10..14 {
        for x in 10..14 {
            data[y * 64 + x] += 1000.0;
        }
    }
    let map = BackgroundMap::tiled(&Buffer2::new(64, 64, data), 32);
    let bg = map.background(12 * 64 + 12);
    assert!((bg - 20.0).abs() < 0.5, "background pulled by star: {bg}");
    assert!(map.noise(12 * 64 + 12) < 2.0);
}

#[test]
fn test_tiled_uniform_frame_uses_fallback_noise() {
    let pixels = Buffer2::new_filled(40, 40, 3.0f32);
    let map = BackgroundMap::tiled(&pixels, 16);
    assert!((map.background(0) - 3.0).abs() < 1e-6);
    assert_eq!(map.noise(820), FALLBACK_NOISE);
}

#[test]
fn test_axis_weights_clamp_and_interpolate() {
    // Cells of 10 over 30 pixels: centers at 4.5, 14.5, 24.5
    let w = axis_weights(30, 10, 3);
    assert_eq!(w[0], (0, 0, 0.0));
    assert_eq!(w[29], (2, 2, 0.0));
    let (a, b, f) = w[9];
    assert_eq!((a, b), (0, 1));
    assert!((f - 0.45).abs() < 1e-6);
}

#[test]
fn test_median_filter_removes_outlier_cell() {
    let mut grid = Buffer2::new_filled(3, 3, 1.0f32);
    grid[(1, 1)] = 100.0;
    let filtered = median_filter_3x3(&grid);
    assert_eq!(filtered[(1, 1)], 1.0);
}
