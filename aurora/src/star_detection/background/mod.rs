//! Background and noise estimation.
//!
//! Two estimators:
//! - [`BackgroundMap::global`]: one median/MAD pair for the whole frame.
//! - [`BackgroundMap::tiled`]: sigma-clipped statistics per mesh cell,
//!   smoothed with a 3x3 median over the cell grid and bilinearly
//!   interpolated between cell centers.

#[cfg(test)]
mod tests;

use rayon::prelude::*;

use crate::common::Buffer2;
use crate::math::{
    mad_to_sigma, median_and_mad_f32_mut, median_f32_mut, sigma_clipped_median_mad,
};

/// Noise estimates at or below this are replaced by [`FALLBACK_NOISE`].
const MIN_NOISE: f32 = 1e-8;

/// Noise used when the data carries no measurable spread (e.g. a uniform frame).
pub const FALLBACK_NOISE: f32 = 1.0;

/// Sigma-clipping parameters for mesh cells.
const CLIP_KAPPA: f32 = 3.0;
const CLIP_ITERATIONS: usize = 5;

/// Per-pixel background level and noise.
#[derive(Debug, Clone)]
pub struct BackgroundMap {
    kind: MapKind,
    width: usize,
    height: usize,
}

#[derive(Debug, Clone)]
enum MapKind {
    Uniform { background: f32, noise: f32 },
    Mesh {
        background: Buffer2<f32>,
        noise: Buffer2<f32>,
    },
}

impl BackgroundMap {
    /// Global median and MAD-derived sigma over the finite samples.
    pub fn global(pixels: &Buffer2<f32>) -> Self {
        let mut samples: Vec<f32> = pixels
            .pixels()
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        let (background, noise) = if samples.is_empty() {
            (0.0, FALLBACK_NOISE)
        } else {
            let (median, mad) = median_and_mad_f32_mut(&mut samples);
            (median, sanitize_noise(mad_to_sigma(mad)))
        };

        tracing::debug!("Global background {background:.4}, noise {noise:.4}");

        Self {
            kind: MapKind::Uniform { background, noise },
            width: pixels.width(),
            height: pixels.height(),
        }
    }

    /// Mesh estimate with cells of `tile_size` pixels.
    pub fn tiled(pixels: &Buffer2<f32>, tile_size: usize) -> Self {
        let width = pixels.width();
        let height = pixels.height();
        let tiles_x = width.div_ceil(tile_size).max(1);
        let tiles_y = height.div_ceil(tile_size).max(1);

        let cells = compute_tile_stats(pixels, tile_size, tiles_x, tiles_y);
        let mut bg_grid = Buffer2::new(tiles_x, tiles_y, cells.iter().map(|c| c.0).collect());
        let mut noise_grid = Buffer2::new(tiles_x, tiles_y, cells.iter().map(|c| c.1).collect());

        fill_missing(&mut bg_grid, 0.0);
        // Cells without spread inherit the typical noise of the frame
        for v in noise_grid.pixels_mut() {
            if *v <= MIN_NOISE {
                *v = f32::NAN;
            }
        }
        fill_missing(&mut noise_grid, FALLBACK_NOISE);

        let bg_grid = median_filter_3x3(&bg_grid);
        let noise_grid = median_filter_3x3(&noise_grid);

        tracing::debug!(
            "Background mesh {}x{} cells of {} px",
            tiles_x,
            tiles_y,
            tile_size
        );

        let xs = axis_weights(width, tile_size, tiles_x);
        let ys = axis_weights(height, tile_size, tiles_y);

        Self {
            kind: MapKind::Mesh {
                background: interpolate(&bg_grid, &xs, &ys),
                noise: interpolate(&noise_grid, &xs, &ys),
            },
            width,
            height,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Background level at a pixel.
    #[inline]
    pub fn background(&self, idx: usize) -> f32 {
        match &self.kind {
            MapKind::Uniform { background, .. } => *background,
            MapKind::Mesh { background, .. } => background[idx],
        }
    }

    /// Noise sigma at a pixel.
    #[inline]
    pub fn noise(&self, idx: usize) -> f32 {
        match &self.kind {
            MapKind::Uniform { noise, .. } => *noise,
            MapKind::Mesh { noise, .. } => noise[idx],
        }
    }

    /// Noise at the nearest pixel to a sub-pixel position.
    pub fn noise_at(&self, x: f32, y: f32) -> f32 {
        let xi = (x.round().max(0.0) as usize).min(self.width.saturating_sub(1));
        let yi = (y.round().max(0.0) as usize).min(self.height.saturating_sub(1));
        self.noise(yi * self.width + xi)
    }
}

#[inline]
fn sanitize_noise(noise: f32) -> f32 {
    if noise.is_finite() && noise > MIN_NOISE {
        noise
    } else {
        FALLBACK_NOISE
    }
}

/// (median, sigma) per cell, NaN for cells without finite samples.
fn compute_tile_stats(
    pixels: &Buffer2<f32>,
    tile_size: usize,
    tiles_x: usize,
    tiles_y: usize,
) -> Vec<(f32, f32)> {
    let width = pixels.width();
    let height = pixels.height();

    (0..tiles_x * tiles_y)
        .into_par_iter()
        .map_init(
            || (Vec::new(), Vec::new()),
            |(values, deviations): &mut (Vec<f32>, Vec<f32>), tile| {
                let tx = tile % tiles_x;
                let ty = tile / tiles_x;
                let x0 = tx * tile_size;
                let x1 = ((tx + 1) * tile_size).min(width);
                let y0 = ty * tile_size;
                let y1 = ((ty + 1) * tile_size).min(height);

                values.clear();
                for y in y0..y1 {
                    values.extend(pixels.row(y)[x0..x1].iter().filter(|v| v.is_finite()));
                }
                if values.is_empty() {
                    return (f32::NAN, f32::NAN);
                }
                sigma_clipped_median_mad(values, deviations, CLIP_KAPPA, CLIP_ITERATIONS)
            },
        )
        .collect()
}

/// Replace NaN cells with the median of the finite cells, or `default`.
fn fill_missing(grid: &mut Buffer2<f32>, default: f32) {
    let mut finite: Vec<f32> = grid
        .pixels()
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    if finite.len() == grid.len() {
        return;
    }
    let fill = if finite.is_empty() {
        default
    } else {
        median_f32_mut(&mut finite)
    };
    for v in grid.pixels_mut() {
        if !v.is_finite() {
            *v = fill;
        }
    }
}

/// 3x3 median over the cell grid, shrinking the window at the edges.
fn median_filter_3x3(grid: &Buffer2<f32>) -> Buffer2<f32> {
    let w = grid.width();
    let h = grid.height();
    let mut window = Vec::with_capacity(9);
    let mut out = Vec::with_capacity(grid.len());

    for y in 0..h {
        for x in 0..w {
            window.clear();
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    window.push(grid[(nx, ny)]);
                }
            }
            out.push(median_f32_mut(&mut window));
        }
    }

    Buffer2::new(w, h, out)
}

/// Interpolation weights along one axis: `(lower cell, upper cell, fraction)`
/// per pixel. Pixels outside the outermost cell centers clamp to that cell.
fn axis_weights(len: usize, tile_size: usize, tiles: usize) -> Vec<(usize, usize, f32)> {
    let center = |t: usize| {
        let start = t * tile_size;
        let end = ((t + 1) * tile_size).min(len);
        (start + end) as f32 * 0.5 - 0.5
    };

    let mut out = Vec::with_capacity(len);
    let mut t = 0usize;
    for p in 0..len {
        let pos = p as f32;
        while t + 1 < tiles && center(t + 1) <= pos {
            t += 1;
        }
        if t + 1 >= tiles || pos <= center(t) {
            out.push((t, t, 0.0));
        } else {
            let c0 = center(t);
            let c1 = center(t + 1);
            out.push((t, t + 1, (pos - c0) / (c1 - c0)));
        }
    }
    out
}

fn interpolate(
    grid: &Buffer2<f32>,
    xs: &[(usize, usize, f32)],
    ys: &[(usize, usize, f32)],
) -> Buffer2<f32> {
    let width = xs.len();
    let height = ys.len();
    let mut out = vec![0.0f32; width * height];

    out.par_chunks_mut(width.max(1))
        .zip(ys.par_iter())
        .for_each(|(row, &(y0, y1, fy))| {
            for (value, &(x0, x1, fx)) in row.iter_mut().zip(xs) {
                let top = grid[(x0, y0)] * (1.0 - fx) + grid[(x1, y0)] * fx;
                let bottom = grid[(x0, y1)] * (1.0 - fx) + grid[(x1, y1)] * fx;
                *value = top * (1.0 - fy) + bottom * fy;
            }
        });

    Buffer2::new(width, height, out)
}
