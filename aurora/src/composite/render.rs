//! Composite renderer.
//!
//! Stages:
//! 1. Select enabled layers of the request size
//! 2. Nearest-neighbor downsample (preview)
//! 3. Linear match and brightness balance against the first layer
//! 4. Normalize to [0, 1], linked or per layer
//! 5. Tint and blend color layers in order
//! 6. Luminance integration by color space
//! 7. Pixel math
//! 8. Display extraction and RGBA8 conversion
//!
//! The async entry point yields and checks its cancel token before every
//! stage and before extraction. On a multi-threaded runtime each stage runs
//! under `block_in_place`.

use std::borrow::Cow;

use glam::Vec3;
use rayon::prelude::*;
use strum_macros::Display;
use tokio::runtime::{Handle, RuntimeFlavor};

use ::common::CancelToken;

use super::blend::{blend_scanline, clamp_opacity};
use super::color::relative_luminance;
use super::{CompositeLayer, DisplayMode, RenderMode, RenderOptions, RenderRequest, RenderResult};
use crate::common::parallel::rows_per_chunk;
use crate::error::{Error, Result};
use crate::matching::{apply_linear_match, estimate_brightness_gain, estimate_linear_match};
use crate::pixel_math::{LayerChannels, PixelMathError, PixelMathInput, apply_pixel_math};

/// Upper bound on samples read per buffer for intensity matching.
const MAX_MATCH_SAMPLES: usize = 1 << 18;

/// Extents narrower than this normalize to zero.
const MIN_EXTENT: f32 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum Stage {
    Downsample,
    Match,
    Normalize,
    Compose,
    Luminance,
    PixelMath,
}

const STAGES: [Stage; 6] = [
    Stage::Downsample,
    Stage::Match,
    Stage::Normalize,
    Stage::Compose,
    Stage::Luminance,
    Stage::PixelMath,
];

// =============================================================================
// Entry points
// =============================================================================

/// Render `request`, yielding to the runtime between stages.
///
/// Returns [`Error::Cancelled`] once `cancel` fires; intermediate buffers
/// are dropped and no partial result is produced.
pub async fn render_composite(
    request: &RenderRequest<'_>,
    cancel: &CancelToken,
) -> Result<RenderResult> {
    check_cancelled(cancel)?;
    let mut pipeline = Pipeline::select(request);

    for stage in STAGES {
        tokio::task::yield_now().await;
        check_cancelled(cancel)?;
        run_off_executor(|| pipeline.run(stage));
    }

    tokio::task::yield_now().await;
    check_cancelled(cancel)?;
    Ok(run_off_executor(|| pipeline.finish()))
}

/// Synchronous [`render_composite`] without cancellation.
pub fn render_composite_blocking(request: &RenderRequest<'_>) -> RenderResult {
    let mut pipeline = Pipeline::select(request);
    for stage in STAGES {
        pipeline.run(stage);
    }
    pipeline.finish()
}

/// Runs a CPU-bound stage through `block_in_place` on a multi-threaded
/// runtime so other tasks migrate off this worker. Current-thread runtimes
/// cannot hand work over and run it inline.
fn run_off_executor<R>(work: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

#[inline]
fn check_cancelled(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        tracing::debug!("Composite render cancelled");
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

// =============================================================================
// Pipeline state
// =============================================================================

struct WorkingLayer<'a> {
    layer: &'a CompositeLayer,
    pixels: Cow<'a, [f32]>,
}

struct Pipeline<'a> {
    options: &'a RenderOptions,
    source_width: usize,
    source_height: usize,
    /// Output size; differs from the source size in preview mode.
    width: usize,
    height: usize,
    layers: Vec<WorkingLayer<'a>>,
    rgb: Option<[Vec<f32>; 3]>,
    /// The accumulator was seeded from the luminance layer.
    gray_seeded: bool,
    pixel_math_error: Option<PixelMathError>,
}

impl<'a> Pipeline<'a> {
    fn select(request: &'a RenderRequest<'_>) -> Self {
        let expected = request.width * request.height;
        let layers: Vec<WorkingLayer<'a>> = request
            .layers
            .iter()
            .filter(|layer| layer.enabled && layer.pixels.len() == expected)
            .map(|layer| WorkingLayer {
                layer,
                pixels: Cow::Borrowed(layer.pixels.as_slice()),
            })
            .collect();
        tracing::debug!(
            "Rendering {} of {} layers ({:?})",
            layers.len(),
            request.layers.len(),
            request.mode
        );

        let (width, height) = match request.mode {
            RenderMode::Full => (request.width, request.height),
            RenderMode::Preview => preview_size(
                request.width,
                request.height,
                request.options.preview_scale,
            ),
        };

        Self {
            options: &request.options,
            source_width: request.width,
            source_height: request.height,
            width,
            height,
            layers,
            rgb: None,
            gray_seeded: false,
            pixel_math_error: None,
        }
    }

    fn run(&mut self, stage: Stage) {
        tracing::trace!("Render stage {stage}");
        match stage {
            Stage::Downsample => self.downsample(),
            Stage::Match => self.match_intensities(),
            Stage::Normalize => self.normalize(),
            Stage::Compose => self.compose(),
            Stage::Luminance => self.integrate_luminance(),
            Stage::PixelMath => self.run_pixel_math(),
        }
    }

    fn luminance_layer(&self) -> Option<&WorkingLayer<'a>> {
        self.layers.iter().find(|l| l.layer.is_luminance)
    }

    // =========================================================================
    // Stages
    // =========================================================================

    fn downsample(&mut self) {
        if (self.width, self.height) == (self.source_width, self.source_height) {
            return;
        }
        let (sw, sh, w, h) = (self.source_width, self.source_height, self.width, self.height);
        self.layers.par_iter_mut().for_each(|wl| {
            wl.pixels = Cow::Owned(downsample_nearest(&wl.pixels, sw, sh, w, h));
        });
    }

    fn match_intensities(&mut self) {
        let options = self.options;
        if !(options.auto_linear_match || options.auto_brightness_balance) {
            return;
        }
        let Some((first, rest)) = self.layers.split_first_mut() else {
            return;
        };
        let reference: &[f32] = &first.pixels;
        let step = (reference.len() / MAX_MATCH_SAMPLES).max(1);

        rest.par_iter_mut().for_each(|wl| {
            if options.auto_linear_match && !wl.layer.skip_linear_match {
                let fit = estimate_linear_match(&wl.pixels, reference, step);
                if !fit.is_identity() {
                    wl.pixels = Cow::Owned(apply_linear_match(&wl.pixels, &fit, true));
                }
            }
            if options.auto_brightness_balance && !wl.layer.skip_brightness_balance {
                let gain = estimate_brightness_gain(&wl.pixels, reference, step).gain;
                if gain != 1.0 {
                    wl.pixels = Cow::Owned(wl.pixels.iter().map(|v| v * gain).collect());
                }
            }
        });
    }

    fn normalize(&mut self) {
        let linked = if self.options.linked_stretch {
            self.layers
                .iter()
                .filter(|wl| !wl.layer.is_luminance)
                .filter_map(|wl| finite_extent(&wl.pixels))
                .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)))
        } else {
            None
        };

        self.layers.par_iter_mut().for_each(|wl| {
            // The luminance layer always uses its own extent
            let extent = if wl.layer.is_luminance || linked.is_none() {
                finite_extent(&wl.pixels)
            } else {
                linked
            };
            wl.pixels = Cow::Owned(normalize_to_unit(&wl.pixels, extent));
        });
    }

    fn compose(&mut self) {
        let len = self.width * self.height;
        let mut color = self.layers.iter().filter(|wl| !wl.layer.is_luminance);

        let Some(first) = color.next() else {
            let gray = self.luminance_layer().map(|lum| lum.pixels.to_vec());
            self.gray_seeded = gray.is_some();
            self.rgb = Some(match gray {
                Some(gray) => [gray.clone(), gray.clone(), gray],
                None => std::array::from_fn(|_| vec![0.0; len]),
            });
            return;
        };

        let tint = first.layer.tint;
        let mut rgb: [Vec<f32>; 3] =
            std::array::from_fn(|c| first.pixels.iter().map(|v| v * tint[c]).collect());
        let mut blended = 0usize;
        for wl in color {
            blend_layer(&mut rgb, wl, self.width);
            blended += 1;
        }
        tracing::debug!("Composited {} color layers", blended + 1);
        self.rgb = Some(rgb);
    }

    fn integrate_luminance(&mut self) {
        if self.gray_seeded {
            return;
        }
        let Some(lum) = self.layers.iter().find(|l| l.layer.is_luminance) else {
            return;
        };
        let Some([r, g, b]) = self.rgb.as_mut() else {
            return;
        };

        let space = self.options.color_space;
        let opacity = clamp_opacity(lum.layer.opacity);
        r.par_iter_mut()
            .zip(g.par_iter_mut())
            .zip(b.par_iter_mut())
            .zip(lum.pixels.par_iter())
            .for_each(|(((r, g), b), &l)| {
                let out = space.integrate(Vec3::new(*r, *g, *b), l, opacity);
                *r = out.x;
                *g = out.y;
                *b = out.z;
            });
        tracing::debug!("Integrated luminance layer `{}` ({space})", lum.layer.id);
    }

    fn run_pixel_math(&mut self) {
        let Some(program) = &self.options.pixel_math else {
            return;
        };
        let Some([r, g, b]) = &self.rgb else {
            return;
        };

        // R{n}/G{n}/B{n} see tinted color layers; luminance layers fall back
        // to their mono samples
        let tinted: Vec<Option<[Vec<f32>; 3]>> = self
            .layers
            .par_iter()
            .map(|wl| {
                (!wl.layer.is_luminance).then(|| -> [Vec<f32>; 3] {
                    let tint = wl.layer.tint;
                    std::array::from_fn(|c| wl.pixels.iter().map(|v| v * tint[c]).collect())
                })
            })
            .collect();

        let input = PixelMathInput {
            width: self.width,
            height: self.height,
            base: [r.as_slice(), g.as_slice(), b.as_slice()],
            layers: self
                .layers
                .iter()
                .zip(&tinted)
                .map(|(wl, rgb)| LayerChannels {
                    mono: &wl.pixels,
                    rgb: rgb
                        .as_ref()
                        .map(|[r, g, b]| [r.as_slice(), g.as_slice(), b.as_slice()]),
                })
                .collect(),
        };
        let output = apply_pixel_math(&input, program);
        match output.error {
            Some(error) => self.pixel_math_error = Some(error),
            None => self.rgb = Some(output.channels),
        }
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    fn finish(self) -> RenderResult {
        let len = self.width * self.height;
        let width = self.width;
        let display = self.options.display;
        let split_position = self.options.split_position;

        let luminance = self
            .layers
            .into_iter()
            .find(|wl| wl.layer.is_luminance)
            .map(|wl| wl.pixels.into_owned());
        let [r, g, b] = self
            .rgb
            .unwrap_or_else(|| std::array::from_fn(|_| vec![0.0; len]));

        let [red, green, blue] = match display {
            DisplayMode::Composite => [r, g, b],
            DisplayMode::Channel(channel) => {
                let gray = match channel.index() {
                    0 => r,
                    1 => g,
                    _ => b,
                };
                [gray.clone(), gray.clone(), gray]
            }
            DisplayMode::Luminance => {
                let gray = gray_view(luminance.as_deref(), &r, &g, &b);
                [gray.clone(), gray.clone(), gray]
            }
            DisplayMode::Split => {
                let gray = gray_view(luminance.as_deref(), &r, &g, &b);
                let split = split_column(split_position, width);
                let mut channels = [r, g, b];
                for channel in channels.iter_mut() {
                    if width == 0 {
                        break;
                    }
                    channel
                        .par_chunks_mut(width)
                        .zip(gray.par_chunks(width))
                        .for_each(|(row, gray_row)| {
                            row[split..].copy_from_slice(&gray_row[split..]);
                        });
                }
                channels
            }
        };

        RenderResult {
            rgba: to_rgba8(&red, &green, &blue),
            red,
            green,
            blue,
            luminance,
            width: self.width,
            height: self.height,
            pixel_math_error: self.pixel_math_error,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Preview dimensions: `max(1, round(scale · dim))` for non-empty sides.
fn preview_size(width: usize, height: usize, scale: f32) -> (usize, usize) {
    let scale = if scale.is_finite() && scale > 0.0 {
        scale.min(1.0)
    } else {
        1.0
    };
    let scaled = |dim: usize| {
        if dim == 0 {
            0
        } else {
            ((dim as f32 * scale).round() as usize).max(1)
        }
    };
    (scaled(width), scaled(height))
}

fn downsample_nearest(src: &[f32], sw: usize, sh: usize, w: usize, h: usize) -> Vec<f32> {
    let map = |i: usize, from: usize, to: usize| {
        (((i as f64 + 0.5) * from as f64 / to as f64) as usize).min(from - 1)
    };
    let columns: Vec<usize> = (0..w).map(|x| map(x, sw, w)).collect();
    let mut out = vec![0.0; w * h];
    if w == 0 {
        return out;
    }
    let rows = rows_per_chunk(h);
    out.par_chunks_mut(w * rows).enumerate().for_each(|(chunk, block)| {
        for (i, row) in block.chunks_mut(w).enumerate() {
            let sy = map(chunk * rows + i, sh, h);
            let src_row = &src[sy * sw..(sy + 1) * sw];
            for (dst, &sx) in row.iter_mut().zip(&columns) {
                *dst = src_row[sx];
            }
        }
    });
    out
}

fn finite_extent(values: &[f32]) -> Option<(f32, f32)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Map `extent` onto [0, 1]; non-finite samples and degenerate extents give 0.
fn normalize_to_unit(values: &[f32], extent: Option<(f32, f32)>) -> Vec<f32> {
    let Some((lo, hi)) = extent.filter(|(lo, hi)| hi - lo > MIN_EXTENT) else {
        return vec![0.0; values.len()];
    };
    let inv = 1.0 / (hi - lo);
    values
        .par_iter()
        .map(|&v| {
            if v.is_finite() {
                ((v - lo) * inv).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Blend one tinted layer into the accumulator, row by row.
fn blend_layer(rgb: &mut [Vec<f32>; 3], wl: &WorkingLayer<'_>, width: usize) {
    if width == 0 {
        return;
    }
    let tint = wl.layer.tint;
    let mode = wl.layer.blend_mode;
    let opacity = wl.layer.opacity;
    let [r, g, b] = rgb;

    r.par_chunks_mut(width)
        .zip(g.par_chunks_mut(width))
        .zip(b.par_chunks_mut(width))
        .zip(wl.pixels.par_chunks(width))
        .for_each_init(
            || -> [Vec<f32>; 3] { Default::default() },
            |scratch, (((r, g), b), src)| {
                for (c, buf) in scratch.iter_mut().enumerate() {
                    buf.clear();
                    buf.extend(src.iter().map(|v| v * tint[c]));
                }
                let [sr, sg, sb] = &*scratch;
                blend_scanline(
                    [r, g, b],
                    [sr.as_slice(), sg.as_slice(), sb.as_slice()],
                    mode,
                    opacity,
                );
            },
        );
}

/// Luminance layer if present, else the relative luminance of the composite.
fn gray_view(luminance: Option<&[f32]>, r: &[f32], g: &[f32], b: &[f32]) -> Vec<f32> {
    match luminance {
        Some(l) => l.to_vec(),
        None => r
            .par_iter()
            .zip(g.par_iter())
            .zip(b.par_iter())
            .map(|((&r, &g), &b)| relative_luminance(Vec3::new(r, g, b)))
            .collect(),
    }
}

fn split_column(position: f32, width: usize) -> usize {
    let position = if position.is_nan() { 0.5 } else { position.clamp(0.0, 1.0) };
    ((position * width as f32).round() as usize).min(width)
}

#[inline]
fn to_u8(v: f32) -> u8 {
    if v.is_nan() {
        0
    } else {
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

fn to_rgba8(red: &[f32], green: &[f32], blue: &[f32]) -> Vec<u8> {
    let mut rgba = vec![255u8; red.len() * 4];
    rgba.par_chunks_mut(4).enumerate().for_each(|(i, px)| {
        px[0] = to_u8(red[i]);
        px[1] = to_u8(green[i]);
        px[2] = to_u8(blue[i]);
    });
    rgba
}
