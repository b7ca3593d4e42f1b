//! Synthetic data for tests.

#![allow(dead_code)]

use rand::prelude::*;

/// Ground truth for a rendered Gaussian point source.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticStar {
    pub x: f32,
    pub y: f32,
    /// Peak amplitude above background.
    pub amplitude: f32,
    /// Gaussian sigma in pixels.
    pub sigma: f32,
}

impl SyntheticStar {
    pub fn new(x: f32, y: f32, amplitude: f32, sigma: f32) -> Self {
        Self {
            x,
            y,
            amplitude,
            sigma,
        }
    }

    pub fn fwhm(&self) -> f32 {
        self.sigma * crate::math::FWHM_PER_SIGMA
    }
}

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    let _ = ::common::setup_logging(&::common::LogConfig::default());
}

/// Render Gaussian stars over a uniform background.
pub fn render_stars(
    width: usize,
    height: usize,
    background: f32,
    stars: &[SyntheticStar],
) -> Vec<f32> {
    let mut pixels = vec![background; width * height];
    for star in stars {
        add_gaussian_star(&mut pixels, width, height, star);
    }
    pixels
}

/// Add one Gaussian star, evaluated out to 6 sigma.
pub fn add_gaussian_star(pixels: &mut [f32], width: usize, height: usize, star: &SyntheticStar) {
    let radius = (star.sigma * 6.0).ceil() as i64;
    let cx = star.x.round() as i64;
    let cy = star.y.round() as i64;
    let inv_two_sigma2 = 1.0 / (2.0 * star.sigma * star.sigma);

    for y in (cy - radius).max(0)..=(cy + radius).min(height as i64 - 1) {
        for x in (cx - radius).max(0)..=(cx + radius).min(width as i64 - 1) {
            let dx = x as f32 - star.x;
            let dy = y as f32 - star.y;
            pixels[y as usize * width + x as usize] +=
                star.amplitude * (-(dx * dx + dy * dy) * inv_two_sigma2).exp();
        }
    }
}

/// Standard normal sample via the Box-Muller transform.
pub fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.random_range(f32::EPSILON..1.0);
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Add zero-mean Gaussian noise with the given sigma, deterministic per seed.
pub fn add_gaussian_noise(pixels: &mut [f32], sigma: f32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for v in pixels.iter_mut() {
        *v += gaussian(&mut rng) * sigma;
    }
}

/// Place `count` stars on a jittered grid, keeping them at least `margin`
/// away from every edge. Neighbours stay more than half a cell apart.
pub fn scattered_stars(
    width: usize,
    height: usize,
    count: usize,
    margin: f32,
    seed: u64,
) -> Vec<SyntheticStar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = (count as f32).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);
    let cell_w = (width as f32 - 2.0 * margin) / cols as f32;
    let cell_h = (height as f32 - 2.0 * margin) / rows as f32;
    let jitter = 0.2;

    (0..count)
        .map(|i| {
            let col = (i % cols) as f32;
            let row = (i / cols) as f32;
            let x = margin + (col + 0.5 + rng.random_range(-jitter..jitter)) * cell_w;
            let y = margin + (row + 0.5 + rng.random_range(-jitter..jitter)) * cell_h;
            let amplitude = rng.random_range(200.0..1000.0);
            let sigma = rng.random_range(1.2..2.2);
            SyntheticStar::new(x, y, amplitude, sigma)
        })
        .collect()
}
