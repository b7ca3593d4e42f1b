//! Frame calibration and master frame creation.
//!
//! A light frame is corrected as `(light - dark - bias) / normalize(flat)`:
//! 1. Subtract dark (thermal signal)
//! 2. Subtract bias (readout offset)
//! 3. Divide by the mean-normalized flat (vignetting, dust)
//!
//! Every stage is skipped when its frame is absent. All frames must have the
//! light frame's sample count; mismatches are reported before any arithmetic.


use rayon::prelude::*;

use crate::error::{Result, ensure_len};
use crate::math::{median_f32_mut, positive_mean};

/// Normalized flat samples below this value are treated as dead pixels:
/// the light value passes through undivided.
pub const FLAT_EPSILON: f32 = 1e-2;

/// Borrowed calibration frames for a single light frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationFrames<'a> {
    pub dark: Option<&'a [f32]>,
    pub flat: Option<&'a [f32]>,
    pub bias: Option<&'a [f32]>,
}

impl CalibrationFrames<'_> {
    /// Check every present frame against the light frame length.
    pub fn validate(&self, light_len: usize) -> Result<()> {
        if let Some(dark) = self.dark {
            ensure_len("dark frame", light_len, dark.len())?;
        }
        if let Some(flat) = self.flat {
            ensure_len("flat frame", light_len, flat.len())?;
        }
        if let Some(bias) = self.bias {
            ensure_len("bias frame", light_len, bias.len())?;
        }
        Ok(())
    }
}

/// Elementwise `light - dark`.
pub fn subtract_dark(light: &[f32], dark: &[f32]) -> Result<Vec<f32>> {
    ensure_len("dark frame", light.len(), dark.len())?;
    Ok(subtract(light, dark))
}

/// Elementwise `light - bias`.
pub fn subtract_bias(light: &[f32], bias: &[f32]) -> Result<Vec<f32>> {
    ensure_len("bias frame", light.len(), bias.len())?;
    Ok(subtract(light, bias))
}

fn subtract(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.par_iter().zip(b.par_iter()).map(|(a, b)| a - b).collect()
}

/// Divide every sample by the mean of the valid (finite, positive) samples.
///
/// Invalid samples do not contribute to the mean but are still divided.
/// A flat without any valid sample is returned unchanged.
pub fn normalize_flat(flat: &[f32]) -> Vec<f32> {
    let Some(mean) = positive_mean(flat) else {
        tracing::warn!("Flat frame has no valid samples, skipping normalization");
        return flat.to_vec();
    };
    let inv_mean = 1.0 / mean;
    flat.par_iter().map(|&v| v * inv_mean).collect()
}

/// Elementwise `light / flat`, passing `light` through where the flat sample
/// is below [`FLAT_EPSILON`] or not finite.
pub fn apply_flat(light: &[f32], normalized_flat: &[f32]) -> Result<Vec<f32>> {
    ensure_len("flat frame", light.len(), normalized_flat.len())?;
    Ok(light
        .par_iter()
        .zip(normalized_flat.par_iter())
        .map(|(&l, &f)| divide_by_flat(l, f))
        .collect())
}

#[inline]
fn divide_by_flat(light: f32, flat: f32) -> f32 {
    if flat.is_finite() && flat >= FLAT_EPSILON {
        light / flat
    } else {
        light
    }
}

/// Calibrate a light frame: `(light - dark - bias) / normalize(flat)`.
pub fn calibrate_frame(light: &[f32], frames: &CalibrationFrames<'_>) -> Result<Vec<f32>> {
    frames.validate(light.len())?;
    let normalized_flat = frames.flat.map(normalize_flat);
    Ok(calibrate_validated(
        light,
        frames.dark,
        frames.bias,
        normalized_flat.as_deref(),
    ))
}

fn calibrate_validated(
    light: &[f32],
    dark: Option<&[f32]>,
    bias: Option<&[f32]>,
    normalized_flat: Option<&[f32]>,
) -> Vec<f32> {
    let mut output = light.to_vec();

    if let Some(dark) = dark {
        output
            .par_iter_mut()
            .zip(dark.par_iter())
            .for_each(|(d, s)| *d -= s);
    }

    if let Some(bias) = bias {
        output
            .par_iter_mut()
            .zip(bias.par_iter())
            .for_each(|(d, s)| *d -= s);
    }

    if let Some(flat) = normalized_flat {
        output
            .par_iter_mut()
            .zip(flat.par_iter())
            .for_each(|(d, &f)| *d = divide_by_flat(*d, f));
    }

    output
}

/// Per-pixel median across dark frames.
///
/// No frames yields an empty buffer; a single frame is returned as-is.
/// Non-finite samples are ignored per pixel; a pixel without any finite
/// sample becomes 0.
pub fn create_master_dark(frames: &[&[f32]]) -> Result<Vec<f32>> {
    let Some(len) = common_len("dark frame", frames)? else {
        return Ok(Vec::new());
    };
    if frames.len() == 1 {
        return Ok(frames[0].to_vec());
    }

    tracing::debug!("Median-combining {} dark frames of {} samples", frames.len(), len);

    let master = (0..len)
        .into_par_iter()
        .map_init(
            || Vec::with_capacity(frames.len()),
            |samples: &mut Vec<f32>, i| {
                samples.clear();
                samples.extend(frames.iter().map(|f| f[i]).filter(|v| v.is_finite()));
                if samples.is_empty() {
                    0.0
                } else {
                    median_f32_mut(samples)
                }
            },
        )
        .collect();
    Ok(master)
}

/// Per-pixel mean across flat frames, then [`normalize_flat`].
pub fn create_master_flat(frames: &[&[f32]]) -> Result<Vec<f32>> {
    let Some(len) = common_len("flat frame", frames)? else {
        return Ok(Vec::new());
    };

    tracing::debug!("Mean-combining {} flat frames of {} samples", frames.len(), len);

    let combined: Vec<f32> = (0..len)
        .into_par_iter()
        .map(|i| {
            let (sum, count) = frames
                .iter()
                .map(|f| f[i])
                .filter(|v| v.is_finite())
                .fold((0.0f64, 0usize), |(s, c), v| (s + v as f64, c + 1));
            if count == 0 {
                0.0
            } else {
                (sum / count as f64) as f32
            }
        })
        .collect();

    Ok(normalize_flat(&combined))
}

/// Returns the shared frame length, `None` for an empty list.
fn common_len(what: &'static str, frames: &[&[f32]]) -> Result<Option<usize>> {
    let Some(first) = frames.first() else {
        return Ok(None);
    };
    for frame in &frames[1..] {
        ensure_len(what, first.len(), frame.len())?;
    }
    Ok(Some(first.len()))
}

/// Owned master calibration frames.
///
/// The flat is stored normalized so it is computed once and applied to many
/// light frames.
#[derive(Debug, Clone, Default)]
pub struct CalibrationMasters {
    /// Master dark frame (per-pixel median of darks).
    pub master_dark: Option<Vec<f32>>,
    /// Normalized master flat frame.
    pub master_flat: Option<Vec<f32>>,
    /// Master bias frame (per-pixel median of biases).
    pub master_bias: Option<Vec<f32>>,
}

impl CalibrationMasters {
    /// Build masters from raw calibration exposures. Empty lists leave the
    /// corresponding master unset.
    pub fn from_frames(darks: &[&[f32]], flats: &[&[f32]], biases: &[&[f32]]) -> Result<Self> {
        let master_dark = (!darks.is_empty())
            .then(|| create_master_dark(darks))
            .transpose()?;
        let master_flat = (!flats.is_empty())
            .then(|| create_master_flat(flats))
            .transpose()?;
        let master_bias = (!biases.is_empty())
            .then(|| create_master_dark(biases))
            .transpose()?;

        let lens = [&master_dark, &master_flat, &master_bias]
            .into_iter()
            .flatten()
            .map(Vec::len)
            .collect::<Vec<_>>();
        if let Some(&first) = lens.first() {
            for &len in &lens[1..] {
                ensure_len("master frame", first, len)?;
            }
        }

        Ok(Self {
            master_dark,
            master_flat,
            master_bias,
        })
    }

    /// Calibrate a light frame with these masters.
    pub fn calibrate(&self, light: &[f32]) -> Result<Vec<f32>> {
        let frames = CalibrationFrames {
            dark: self.master_dark.as_deref(),
            flat: self.master_flat.as_deref(),
            bias: self.master_bias.as_deref(),
        };
        frames.validate(light.len())?;
        Ok(calibrate_validated(
            light,
            frames.dark,
            frames.bias,
            frames.flat,
        ))
    }
}
