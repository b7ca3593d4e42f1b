//! Per-object measurement: centroid, flux, second moments, shape metrics.
//!
//! The legacy path uses intensity-weighted moments over the object's
//! thresholded pixels. The accurate path refines centroid and shape with
//! Gaussian-weighted adaptive moments on a stamp around the object, which
//! also sees the faint wings below the detection threshold.


use super::background::BackgroundMap;
use super::star::Star;
use crate::common::Buffer2;
use crate::math::FWHM_PER_SIGMA;

/// Owner id for pixels that belong to no object.
pub const NO_OWNER: u32 = 0;

const MAX_ITERATIONS: usize = 50;
const CONVERGENCE_TOLERANCE: f32 = 1e-3;
const MIN_STAMP_RADIUS: i64 = 3;
const MAX_STAMP_RADIUS: i64 = 32;

/// Centroid and central second moments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub cx: f32,
    pub cy: f32,
    pub mxx: f32,
    pub myy: f32,
    pub mxy: f32,
}

impl Moments {
    /// Eigenvalues of the covariance matrix, larger first.
    pub fn eigenvalues(&self) -> (f32, f32) {
        let half_trace = 0.5 * (self.mxx + self.myy);
        let half_diff = 0.5 * (self.mxx - self.myy);
        let root = (half_diff * half_diff + self.mxy * self.mxy).sqrt();
        (half_trace + root, half_trace - root)
    }

    /// FWHM of the equivalent circular Gaussian.
    pub fn fwhm(&self) -> f32 {
        let (l1, l2) = self.eigenvalues();
        FWHM_PER_SIGMA * (0.5 * (l1 + l2)).max(0.0).sqrt()
    }

    /// `1 - b/a` of the moment ellipse.
    pub fn ellipticity(&self) -> f32 {
        let (l1, l2) = self.eigenvalues();
        if l1 <= 0.0 {
            return 0.0;
        }
        (1.0 - (l2.max(0.0) / l1).sqrt()).clamp(0.0, 1.0)
    }
}

/// Shared inputs for measuring the objects of one frame.
#[derive(Debug)]
pub struct MeasureContext<'a> {
    pub pixels: &'a Buffer2<f32>,
    pub background: &'a BackgroundMap,
    /// Object id (`index + 1`) per pixel, [`NO_OWNER`] elsewhere.
    pub owners: &'a Buffer2<u32>,
    pub adaptive: bool,
}

impl MeasureContext<'_> {
    #[inline]
    fn value(&self, idx: usize) -> f32 {
        self.pixels[idx] - self.background.background(idx)
    }

    /// Measure object `index`. `None` when the object has no positive flux.
    pub fn measure(&self, index: usize, object: &[usize]) -> Option<Star> {
        let width = self.pixels.width();

        let mut flux = 0.0f64;
        let mut sx = 0.0f64;
        let mut sy = 0.0f64;
        let mut peak = f32::NEG_INFINITY;
        for &idx in object {
            let v = self.value(idx);
            flux += v as f64;
            sx += v as f64 * (idx % width) as f64;
            sy += v as f64 * (idx / width) as f64;
            peak = peak.max(v);
        }
        if !(flux > 0.0) {
            return None;
        }

        let cx = sx / flux;
        let cy = sy / flux;
        let (mut mxx, mut myy, mut mxy) = (0.0f64, 0.0f64, 0.0f64);
        for &idx in object {
            let v = self.value(idx) as f64;
            let dx = (idx % width) as f64 - cx;
            let dy = (idx / width) as f64 - cy;
            mxx += v * dx * dx;
            myy += v * dy * dy;
            mxy += v * dx * dy;
        }
        let threshold_moments = Moments {
            cx: cx as f32,
            cy: cy as f32,
            mxx: (mxx / flux) as f32,
            myy: (myy / flux) as f32,
            mxy: (mxy / flux) as f32,
        };

        let moments = if self.adaptive {
            self.adaptive_moments(index as u32 + 1, threshold_moments)
                .unwrap_or(threshold_moments)
        } else {
            threshold_moments
        };

        let flux = flux as f32;
        let area = object.len();
        let noise = self.background.noise_at(moments.cx, moments.cy);

        Some(Star {
            x: moments.cx,
            y: moments.cy,
            area,
            flux,
            fwhm: moments.fwhm(),
            ellipticity: moments.ellipticity(),
            snr: flux / (noise * (area as f32).sqrt()),
            peak,
        })
    }

    /// Gaussian-weighted adaptive moments, corrected for the weight.
    ///
    /// For a Gaussian source of variance s² measured with a Gaussian weight
    /// of variance w², the weighted variance is s²w²/(s² + w²). Iterating
    /// w = s converges on the source size. Pixels owned by other objects
    /// are excluded from the stamp.
    fn adaptive_moments(&self, own_id: u32, start: Moments) -> Option<Moments> {
        let width = self.pixels.width() as i64;
        let height = self.pixels.height() as i64;

        let mut cx = start.cx;
        let mut cy = start.cy;
        let mut w = (0.5 * (start.mxx + start.myy)).max(0.25).sqrt().clamp(0.8, 10.0);
        let mut measured = None;

        for _ in 0..MAX_ITERATIONS {
            let radius = ((4.0 * w).ceil() as i64).clamp(MIN_STAMP_RADIUS, MAX_STAMP_RADIUS);
            let x0 = (cx.round() as i64 - radius).max(0);
            let x1 = (cx.round() as i64 + radius).min(width - 1);
            let y0 = (cy.round() as i64 - radius).max(0);
            let y1 = (cy.round() as i64 + radius).min(height - 1);
            let inv_two_w2 = 1.0 / (2.0 * w * w);

            let (mut s, mut sx, mut sy) = (0.0f64, 0.0f64, 0.0f64);
            let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let idx = (y * width + x) as usize;
                    let owner = self.owners[idx];
                    if owner != NO_OWNER && owner != own_id {
                        continue;
                    }
                    let v = self.value(idx);
                    if !v.is_finite() {
                        continue;
                    }
                    let dx = x as f32 - cx;
                    let dy = y as f32 - cy;
                    let g = (-(dx * dx + dy * dy) * inv_two_w2).exp();
                    let gv = (g * v) as f64;
                    s += gv;
                    sx += gv * dx as f64;
                    sy += gv * dy as f64;
                    sxx += gv * (dx * dx) as f64;
                    syy += gv * (dy * dy) as f64;
                    sxy += gv * (dx * dy) as f64;
                }
            }
            if !(s > 0.0) {
                return None;
            }

            let mx = sx / s;
            let my = sy / s;
            let m = Moments {
                cx: cx + mx as f32,
                cy: cy + my as f32,
                mxx: (sxx / s - mx * mx) as f32,
                myy: (syy / s - my * my) as f32,
                mxy: (sxy / s - mx * my) as f32,
            };
            let weighted_var = 0.5 * (m.mxx + m.myy);
            if !(weighted_var > 0.0) {
                return None;
            }

            let shift = (mx * mx + my * my).sqrt() as f32;
            cx = m.cx;
            cy = m.cy;

            let w2 = w * w;
            if weighted_var >= 0.9 * w2 {
                // Weight much narrower than the source
                w = (w * 1.5).min(MAX_STAMP_RADIUS as f32 / 4.0);
                continue;
            }

            measured = Some((m, w));
            let source_var = weighted_var * w2 / (w2 - weighted_var);
            let next_w = source_var.sqrt();
            let converged =
                (next_w - w).abs() < CONVERGENCE_TOLERANCE * w && shift < CONVERGENCE_TOLERANCE;
            w = next_w.clamp(0.5, MAX_STAMP_RADIUS as f32 / 4.0);
            if converged {
                break;
            }
        }

        let (m, w) = measured?;
        Some(deconvolve_weight(m, w))
    }
}

/// Remove the Gaussian weight from weighted moments: `C = (M⁻¹ - I/w²)⁻¹`.
///
/// Falls back to an isotropic correction when the result is not positive
/// definite.
fn deconvolve_weight(m: Moments, w: f32) -> Moments {
    let det = m.mxx * m.myy - m.mxy * m.mxy;
    let inv_w2 = 1.0 / (w * w);

    if det > 0.0 {
        // Inverse of M minus I/w²
        let a = m.myy / det - inv_w2;
        let d = m.mxx / det - inv_w2;
        let b = -m.mxy / det;
        let det2 = a * d - b * b;
        if det2 > 0.0 && a > 0.0 {
            return Moments {
                mxx: d / det2,
                myy: a / det2,
                mxy: -b / det2,
                ..m
            };
        }
    }

    let weighted_var = 0.5 * (m.mxx + m.myy);
    let w2 = w * w;
    let scale = if weighted_var < w2 {
        w2 / (w2 - weighted_var)
    } else {
        1.0
    };
    Moments {
        mxx: m.mxx * scale,
        myy: m.myy * scale,
        mxy: m.mxy * scale,
        ..m
    }
}
