//! Star detection pipeline and the [`StarDetector`] wrapper.
//!
//! Stages:
//! 1. Background and noise (global or mesh)
//! 2. Threshold + connected components (row-sequential, chunkable)
//! 3. Area limits
//! 4. Deblending (accurate profile)
//! 5. Measurement
//! 6. Border exclusion and shape filtering
//! 7. Sort by flux, truncate to `max_stars`

#[cfg(test)]
mod tests;

use rayon::prelude::*;

use ::common::{CancelToken, SharedFn};

use super::background::BackgroundMap;
use super::config::StarDetectionConfig;
use super::deblend::{DeblendParams, deblend};
use super::labeling::{LabelMap, LabelScanner};
use super::measure::{MeasureContext, NO_OWNER};
use super::star::{Star, sort_by_flux};
use crate::common::Buffer2;
use crate::error::{Error, Result, ensure_len};

/// Default rows per chunk for [`detect_stars_async`].
pub const DEFAULT_CHUNK_ROWS: usize = 64;

/// Share of the progress range spent on the chunked scan; the rest covers
/// deblending and measurement.
const SCAN_PROGRESS_SHARE: f32 = 0.9;

/// Progress callback receiving a ratio in `[0, 1]`.
pub type ProgressFn = SharedFn<dyn Fn(f32) + Send + Sync>;

/// Options for [`detect_stars_async`].
#[derive(Debug, Clone)]
pub struct AsyncDetectOptions {
    /// Called after every chunk with a non-decreasing ratio; the last call on
    /// success is exactly 1.0.
    pub on_progress: ProgressFn,
    /// Rows per chunk. 0 is treated as 1.
    pub chunk_rows: usize,
    pub cancel: CancelToken,
}

impl Default for AsyncDetectOptions {
    fn default() -> Self {
        Self {
            on_progress: SharedFn::None,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            cancel: CancelToken::new(),
        }
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Detect stars in a row-major frame.
pub fn detect_stars(
    pixels: &[f32],
    width: usize,
    height: usize,
    config: &StarDetectionConfig,
) -> Result<Vec<Star>> {
    let frame = prepare(pixels, width, height, config)?;
    let background = estimate_background(&frame, config);

    let mut scanner = LabelScanner::new(
        &frame,
        &background,
        config.sigma_threshold,
        config.connectivity,
    );
    scanner.scan_all();
    let labels = scanner.finish();

    Ok(extract_stars(&frame, &background, &labels, config))
}

/// Chunked, cancellable variant of [`detect_stars`].
///
/// Yields to the runtime and checks the cancel token between row chunks.
/// Returns the same stars as [`detect_stars`] for the same input, or
/// [`Error::Cancelled`] without any stars.
pub async fn detect_stars_async(
    pixels: &[f32],
    width: usize,
    height: usize,
    config: &StarDetectionConfig,
    options: AsyncDetectOptions,
) -> Result<Vec<Star>> {
    let cancel = &options.cancel;
    check_cancelled(cancel)?;

    let frame = prepare(pixels, width, height, config)?;
    let background = estimate_background(&frame, config);
    check_cancelled(cancel)?;

    let chunk_rows = options.chunk_rows.max(1);
    let mut scanner = LabelScanner::new(
        &frame,
        &background,
        config.sigma_threshold,
        config.connectivity,
    );
    let mut last_progress = 0.0f32;

    while !scanner.is_done() {
        scanner.scan_rows(chunk_rows);

        let ratio = scanner.rows_done() as f32 / height as f32 * SCAN_PROGRESS_SHARE;
        last_progress = last_progress.max(ratio);
        options.on_progress.call(last_progress);
        tracing::trace!("Scanned {}/{} rows", scanner.rows_done(), height);

        tokio::task::yield_now().await;
        check_cancelled(cancel)?;
    }

    let labels = scanner.finish();
    let stars = extract_stars(&frame, &background, &labels, config);
    check_cancelled(cancel)?;

    options.on_progress.call(1.0);
    Ok(stars)
}

#[inline]
fn check_cancelled(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        tracing::debug!("Star detection cancelled");
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn prepare(
    pixels: &[f32],
    width: usize,
    height: usize,
    config: &StarDetectionConfig,
) -> Result<Buffer2<f32>> {
    config.validate();
    ensure_len("star detection frame", width * height, pixels.len())?;
    Ok(Buffer2::new(width, height, pixels.to_vec()))
}

fn estimate_background(frame: &Buffer2<f32>, config: &StarDetectionConfig) -> BackgroundMap {
    if config.is_accurate() {
        BackgroundMap::tiled(frame, config.tile_size)
    } else {
        BackgroundMap::global(frame)
    }
}

// =============================================================================
// Object extraction
// =============================================================================

fn extract_stars(
    frame: &Buffer2<f32>,
    background: &BackgroundMap,
    labels: &LabelMap,
    config: &StarDetectionConfig,
) -> Vec<Star> {
    let width = frame.width();
    let components: Vec<Vec<usize>> = labels
        .components()
        .into_iter()
        .filter(|c| (config.min_area..=config.max_area).contains(&c.len()))
        .collect();
    tracing::debug!(
        "{} components, {} within area limits",
        labels.num_labels(),
        components.len()
    );

    let objects: Vec<Vec<usize>> = if config.is_accurate() && config.deblend_n_levels > 0 {
        let params = DeblendParams {
            n_levels: config.deblend_n_levels,
            min_contrast: config.deblend_min_contrast,
            min_area: config.min_area,
            connectivity: config.connectivity,
        };
        let objects: Vec<Vec<usize>> = components
            .par_iter()
            .flat_map_iter(|component| {
                let values: Vec<f32> = component
                    .iter()
                    .map(|&i| frame[i] - background.background(i))
                    .collect();
                deblend(component, &values, width, &params)
            })
            .collect();
        tracing::debug!("Deblending produced {} objects", objects.len());
        objects
    } else {
        components
    };

    let mut owners = Buffer2::new_filled(width, frame.height(), NO_OWNER);
    for (id, object) in objects.iter().enumerate() {
        for &idx in object {
            owners[idx] = id as u32 + 1;
        }
    }

    let ctx = MeasureContext {
        pixels: frame,
        background,
        owners: &owners,
        adaptive: config.is_accurate(),
    };
    let measured: Vec<Star> = objects
        .par_iter()
        .enumerate()
        .filter_map(|(id, object)| ctx.measure(id, object))
        .collect();
    let measured_count = measured.len();

    let mut stars: Vec<Star> = measured
        .into_iter()
        .filter(|s| inside_border(s, frame.width(), frame.height(), config.border_margin))
        .filter(|s| !config.is_accurate() || passes_shape_filter(s, config))
        .collect();
    tracing::debug!(
        "Measured {} objects, {} pass border and shape filters",
        measured_count,
        stars.len()
    );

    sort_by_flux(&mut stars);
    if let Some(max_stars) = config.max_stars {
        stars.truncate(max_stars);
    }
    stars
}

fn inside_border(star: &Star, width: usize, height: usize, margin: usize) -> bool {
    let m = margin as f32;
    star.x >= m
        && star.y >= m
        && star.x <= width as f32 - 1.0 - m
        && star.y <= height as f32 - 1.0 - m
}

fn passes_shape_filter(star: &Star, config: &StarDetectionConfig) -> bool {
    if let Some(max) = config.max_ellipticity
        && star.ellipticity > max
    {
        return false;
    }
    if let Some(min) = config.filter_fwhm
        && star.fwhm < min
    {
        return false;
    }
    if let Some(max) = config.max_fwhm
        && star.fwhm > max
    {
        return false;
    }
    true
}

// =============================================================================
// StarDetector
// =============================================================================

/// Star detector holding a validated configuration.
///
/// # Example
///
/// ```rust,ignore
/// let detector = StarDetector::from_config(StarDetectionConfig::accurate());
/// let stars = detector.detect(&pixels, width, height)?;
///
/// // Batch detection (parallel)
/// let results = detector.detect_all(&[&frame_a, &frame_b], width, height);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StarDetector {
    config: StarDetectionConfig,
}

impl StarDetector {
    /// Detector with the legacy defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: StarDetectionConfig) -> Self {
        config.validate();
        Self { config }
    }

    pub fn config(&self) -> &StarDetectionConfig {
        &self.config
    }

    pub fn detect(&self, pixels: &[f32], width: usize, height: usize) -> Result<Vec<Star>> {
        detect_stars(pixels, width, height, &self.config)
    }

    pub async fn detect_async(
        &self,
        pixels: &[f32],
        width: usize,
        height: usize,
        options: AsyncDetectOptions,
    ) -> Result<Vec<Star>> {
        detect_stars_async(pixels, width, height, &self.config, options).await
    }

    /// Detect stars in several equally sized frames in parallel.
    pub fn detect_all(
        &self,
        frames: &[&[f32]],
        width: usize,
        height: usize,
    ) -> Vec<Result<Vec<Star>>> {
        frames
            .par_iter()
            .map(|frame| self.detect(frame, width, height))
            .collect()
    }
}
