//! Registration adapter.
//!
//! Geometric alignment itself is an external collaborator behind the
//! [`Aligner`] trait. This module prepares its input (star lists or manual
//! control points), validates its output, and owns the framing policy:
//! keeping the reference frame or cropping every layer to the region covered
//! by all of them.
//!
//! Transforms map output (reference-frame) pixel coordinates to source-layer
//! pixel coordinates.


use glam::{DAffine2, DVec2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::common::Buffer2;
use crate::error::{Error, Result, ensure_len};
use crate::star_detection::{Star, StarDetectionConfig, detect_stars};

/// Tolerance for deciding that a mapped coordinate still lies on the source
/// pixel grid.
const COVERAGE_EPSILON: f64 = 1e-6;

// =============================================================================
// Types
// =============================================================================

/// One manual correspondence between the reference frame and a layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub reference: DVec2,
    pub layer: DVec2,
}

impl Correspondence {
    pub fn new(reference: DVec2, layer: DVec2) -> Self {
        Self { reference, layer }
    }
}

/// Manual control points for a single layer: 2 or 3 correspondences.
pub type ControlPoints = Vec<Correspondence>;

/// How layers are brought into the reference frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlignMode {
    /// Identity transforms; the collaborator is not called.
    #[default]
    None,
    /// Detect stars per layer and let the collaborator match them.
    Stars(StarDetectionConfig),
    /// Forward per-layer control points verbatim.
    Manual(Vec<ControlPoints>),
}

/// Output frame policy after alignment.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Framing {
    /// Keep the reference layer's dimensions.
    #[default]
    First,
    /// Crop to the bounding box covered by every layer.
    Min,
}

/// Input handed to the alignment collaborator.
#[derive(Debug, Clone)]
pub enum AlignRequest<'a> {
    Stars {
        layers: &'a [&'a [f32]],
        stars: Vec<Vec<Star>>,
        width: usize,
        height: usize,
    },
    Manual {
        layers: &'a [&'a [f32]],
        points: &'a [ControlPoints],
        width: usize,
        height: usize,
    },
}

impl AlignRequest<'_> {
    pub fn layer_count(&self) -> usize {
        match self {
            AlignRequest::Stars { layers, .. } | AlignRequest::Manual { layers, .. } => {
                layers.len()
            }
        }
    }
}

/// One layer resampled into the reference frame by the collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedLayer {
    /// Output pixel coordinates to source-layer pixel coordinates.
    pub transform: DAffine2,
    /// Resampled pixels, `width × height` of the request.
    pub pixels: Vec<f32>,
}

pub type AlignerError = Box<dyn std::error::Error + Send + Sync>;

/// External geometric-alignment collaborator.
pub trait Aligner: Send + Sync {
    /// Returns one aligned layer per requested layer, in order.
    fn align(&self, request: &AlignRequest<'_>) -> std::result::Result<Vec<AlignedLayer>, AlignerError>;
}

/// Result of [`align_layers`].
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub transforms: Vec<DAffine2>,
    pub layers: Vec<Vec<f32>>,
    pub width: usize,
    pub height: usize,
}

/// Axis-aligned pixel rectangle, inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

impl PixelRect {
    fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }

    fn height(&self) -> usize {
        self.y1 - self.y0 + 1
    }

    fn union(self, other: Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Align `layers` (all `width × height`) into the first layer's frame and
/// apply the framing policy.
pub fn align_layers(
    aligner: &dyn Aligner,
    layers: &[&[f32]],
    width: usize,
    height: usize,
    mode: &AlignMode,
    framing: Framing,
) -> Result<Registration> {
    for layer in layers {
        ensure_len("registration layer", width * height, layer.len())?;
    }

    let aligned = match mode {
        AlignMode::None => layers
            .iter()
            .map(|layer| AlignedLayer {
                transform: DAffine2::IDENTITY,
                pixels: layer.to_vec(),
            })
            .collect(),
        AlignMode::Stars(config) => {
            let stars = layers
                .par_iter()
                .map(|layer| detect_stars(layer, width, height, config))
                .collect::<Result<Vec<_>>>()?;
            tracing::debug!(
                "Star counts per layer: {:?}",
                stars.iter().map(Vec::len).collect::<Vec<_>>()
            );
            let request = AlignRequest::Stars {
                layers,
                stars,
                width,
                height,
            };
            run_aligner(aligner, &request, width, height)?
        }
        AlignMode::Manual(points) => {
            if points.len() != layers.len() {
                return Err(Error::Alignment(format!(
                    "{} control point sets for {} layers",
                    points.len(),
                    layers.len()
                )));
            }
            for (layer, set) in points.iter().enumerate() {
                if !(2..=3).contains(&set.len()) {
                    return Err(Error::InvalidControlPoints {
                        layer,
                        count: set.len(),
                    });
                }
            }
            let request = AlignRequest::Manual {
                layers,
                points,
                width,
                height,
            };
            run_aligner(aligner, &request, width, height)?
        }
    };

    match framing {
        Framing::First => Ok(into_registration(aligned, width, height)),
        Framing::Min => crop_to_overlap(aligned, width, height),
    }
}

fn run_aligner(
    aligner: &dyn Aligner,
    request: &AlignRequest<'_>,
    width: usize,
    height: usize,
) -> Result<Vec<AlignedLayer>> {
    let aligned = aligner
        .align(request)
        .map_err(|err| Error::Alignment(err.to_string()))?;

    if aligned.len() != request.layer_count() {
        return Err(Error::Alignment(format!(
            "aligner returned {} layers, expected {}",
            aligned.len(),
            request.layer_count()
        )));
    }
    for layer in &aligned {
        ensure_len("aligned layer", width * height, layer.pixels.len())?;
    }
    Ok(aligned)
}

fn into_registration(aligned: Vec<AlignedLayer>, width: usize, height: usize) -> Registration {
    let (transforms, layers) = aligned
        .into_iter()
        .map(|layer| (layer.transform, layer.pixels))
        .unzip();
    Registration {
        transforms,
        layers,
        width,
        height,
    }
}

// =============================================================================
// Framing
// =============================================================================

fn crop_to_overlap(aligned: Vec<AlignedLayer>, width: usize, height: usize) -> Result<Registration> {
    if aligned.is_empty() {
        return Ok(into_registration(aligned, width, height));
    }

    let transforms: Vec<DAffine2> = aligned.iter().map(|l| l.transform).collect();
    let rect = common_overlap(&transforms, width, height).ok_or(Error::EmptyOverlap)?;
    tracing::debug!(
        "Cropping {}x{} to {}x{} at ({}, {})",
        width,
        height,
        rect.width(),
        rect.height(),
        rect.x0,
        rect.y0
    );

    let shift = DAffine2::from_translation(DVec2::new(rect.x0 as f64, rect.y0 as f64));
    let (transforms, layers) = aligned
        .into_par_iter()
        .map(|layer| {
            let buffer = Buffer2::new(width, height, layer.pixels);
            let cropped = buffer.crop(rect.x0, rect.y0, rect.width(), rect.height());
            (layer.transform * shift, cropped.into_pixels())
        })
        .unzip();

    Ok(Registration {
        transforms,
        layers,
        width: rect.width(),
        height: rect.height(),
    })
}

/// Bounding box of the output pixels whose mapped position lies on every
/// layer's source grid.
fn common_overlap(transforms: &[DAffine2], width: usize, height: usize) -> Option<PixelRect> {
    let max_x = (width as f64 - 1.0) + COVERAGE_EPSILON;
    let max_y = (height as f64 - 1.0) + COVERAGE_EPSILON;
    let covered = |x: usize, y: usize| {
        let p = DVec2::new(x as f64, y as f64);
        transforms.iter().all(|t| {
            let s = t.transform_point2(p);
            s.x >= -COVERAGE_EPSILON && s.y >= -COVERAGE_EPSILON && s.x <= max_x && s.y <= max_y
        })
    };

    (0..height)
        .into_par_iter()
        .filter_map(|y| {
            let first = (0..width).find(|&x| covered(x, y))?;
            let last = (0..width).rev().find(|&x| covered(x, y))?;
            Some(PixelRect {
                x0: first,
                y0: y,
                x1: last,
                y1: y,
            })
        })
        .reduce_with(PixelRect::union)
}
