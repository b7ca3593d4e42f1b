//! Blend modes over normalized RGB triples.
//!
//! Separable modes apply per channel; `hue`, `saturation`, `color` and
//! `luminosity` work on the whole triple through the Lum/Sat/ClipColor
//! helpers of the W3C compositing model.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Blend modes for combining a layer (source) with the accumulated
/// composite (backdrop).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BlendMode {
    /// result = source
    #[default]
    Normal,
    /// result = backdrop * source
    Multiply,
    /// result = backdrop + source - backdrop * source
    Screen,
    /// Hard light with the layers swapped
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    /// Source hue with backdrop saturation and luminosity
    Hue,
    /// Source saturation with backdrop hue and luminosity
    Saturation,
    /// Source hue and saturation with backdrop luminosity
    Color,
    /// Source luminosity with backdrop hue and saturation
    Luminosity,
}

impl BlendMode {
    pub fn is_separable(self) -> bool {
        !matches!(
            self,
            BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity
        )
    }
}

// ============================================================================
// Separable
// ============================================================================

#[inline]
fn blend_channel(cb: f32, cs: f32, mode: BlendMode) -> f32 {
    match mode {
        BlendMode::Normal => cs,
        BlendMode::Multiply => cb * cs,
        BlendMode::Screen => screen(cb, cs),
        BlendMode::Overlay => hard_light(cs, cb),
        BlendMode::Darken => cb.min(cs),
        BlendMode::Lighten => cb.max(cs),
        BlendMode::ColorDodge => {
            if cb <= 0.0 {
                0.0
            } else if cs >= 1.0 {
                1.0
            } else {
                (cb / (1.0 - cs)).min(1.0)
            }
        }
        BlendMode::ColorBurn => {
            if cb >= 1.0 {
                1.0
            } else if cs <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - cb) / cs).min(1.0)
            }
        }
        BlendMode::HardLight => hard_light(cb, cs),
        BlendMode::SoftLight => soft_light(cb, cs),
        BlendMode::Difference => (cb - cs).abs(),
        BlendMode::Exclusion => cb + cs - 2.0 * cb * cs,
        BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity => cs,
    }
}

#[inline]
fn screen(cb: f32, cs: f32) -> f32 {
    cb + cs - cb * cs
}

#[inline]
fn hard_light(cb: f32, cs: f32) -> f32 {
    if cs <= 0.5 {
        cb * 2.0 * cs
    } else {
        screen(cb, 2.0 * cs - 1.0)
    }
}

#[inline]
fn soft_light(cb: f32, cs: f32) -> f32 {
    if cs <= 0.5 {
        cb - (1.0 - 2.0 * cs) * cb * (1.0 - cb)
    } else {
        let d = if cb <= 0.25 {
            ((16.0 * cb - 12.0) * cb + 4.0) * cb
        } else {
            cb.sqrt()
        };
        cb + (2.0 * cs - 1.0) * (d - cb)
    }
}

// ============================================================================
// Non-separable
// ============================================================================

const LUM_WEIGHTS: Vec3 = Vec3::new(0.3, 0.59, 0.11);

#[inline]
fn lum(c: Vec3) -> f32 {
    c.dot(LUM_WEIGHTS)
}

fn clip_color(c: Vec3) -> Vec3 {
    let l = lum(c);
    let n = c.min_element();
    let x = c.max_element();
    let mut c = c;
    if n < 0.0 && l - n > f32::EPSILON {
        c = Vec3::splat(l) + (c - Vec3::splat(l)) * l / (l - n);
    }
    if x > 1.0 && x - l > f32::EPSILON {
        c = Vec3::splat(l) + (c - Vec3::splat(l)) * (1.0 - l) / (x - l);
    }
    c
}

#[inline]
fn set_lum(c: Vec3, l: f32) -> Vec3 {
    clip_color(c + Vec3::splat(l - lum(c)))
}

#[inline]
fn sat(c: Vec3) -> f32 {
    c.max_element() - c.min_element()
}

/// Rescale so the minimum channel becomes 0 and the maximum becomes `s`.
fn set_sat(c: Vec3, s: f32) -> Vec3 {
    let min = c.min_element();
    let range = c.max_element() - min;
    if range > 0.0 {
        (c - Vec3::splat(min)) * (s / range)
    } else {
        Vec3::ZERO
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Blend `source` onto `backdrop` with `mode`, without opacity.
pub fn blend(backdrop: Vec3, source: Vec3, mode: BlendMode) -> Vec3 {
    match mode {
        BlendMode::Hue => set_lum(set_sat(source, sat(backdrop)), lum(backdrop)),
        BlendMode::Saturation => set_lum(set_sat(backdrop, sat(source)), lum(backdrop)),
        BlendMode::Color => set_lum(source, lum(backdrop)),
        BlendMode::Luminosity => set_lum(backdrop, lum(source)),
        _ => Vec3::new(
            blend_channel(backdrop.x, source.x, mode),
            blend_channel(backdrop.y, source.y, mode),
            blend_channel(backdrop.z, source.z, mode),
        ),
    }
}

/// `backdrop · (1 − α) + blend · α` with α = `opacity` clamped to [0, 1].
#[inline]
pub fn composite_layer(backdrop: Vec3, source: Vec3, mode: BlendMode, opacity: f32) -> Vec3 {
    let alpha = clamp_opacity(opacity);
    if alpha <= 0.0 {
        return backdrop;
    }
    backdrop * (1.0 - alpha) + blend(backdrop, source, mode) * alpha
}

/// Opacity clamped to [0, 1]; NaN counts as fully transparent.
#[inline]
pub fn clamp_opacity(opacity: f32) -> f32 {
    if opacity.is_nan() {
        0.0
    } else {
        opacity.clamp(0.0, 1.0)
    }
}

/// Composite per-channel `source` buffers into `backdrop` in place.
///
/// # Panics
/// If the six slices do not all have the same length.
pub fn blend_scanline(backdrop: [&mut [f32]; 3], source: [&[f32]; 3], mode: BlendMode, opacity: f32) {
    let [br, bg, bb] = backdrop;
    let [sr, sg, sb] = source;
    let len = br.len();
    assert!(
        [bg.len(), bb.len(), sr.len(), sg.len(), sb.len()]
            .iter()
            .all(|&l| l == len),
        "scanline length mismatch"
    );

    for i in 0..len {
        let out = composite_layer(
            Vec3::new(br[i], bg[i], bb[i]),
            Vec3::new(sr[i], sg[i], sb[i]),
            mode,
            opacity,
        );
        br[i] = out.x;
        bg[i] = out.y;
        bb[i] = out.z;
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn test_separable_formulas() {
        let cb = Vec3::new(0.2, 0.5, 0.8);
        let cs = Vec3::new(0.6, 0.5, 0.1);

        assert_eq!(blend(cb, cs, BlendMode::Normal), cs);
        assert!(approx(blend(cb, cs, BlendMode::Multiply), Vec3::new(0.12, 0.25, 0.08)));
        assert!(approx(blend(cb, cs, BlendMode::Screen), Vec3::new(0.68, 0.75, 0.82)));
        assert!(approx(blend(cb, cs, BlendMode::Darken), Vec3::new(0.2, 0.5, 0.1)));
        assert!(approx(blend(cb, cs, BlendMode::Lighten), Vec3::new(0.6, 0.5, 0.8)));
        assert!(approx(blend(cb, cs, BlendMode::Difference), Vec3::new(0.4, 0.0, 0.7)));
        assert!(approx(blend(cb, cs, BlendMode::Exclusion), Vec3::new(0.56, 0.5, 0.74)));
        // Overlay keys on the backdrop: 2·cb·cs below 0.5, screen above
        assert!(approx(
            blend(cb, cs, BlendMode::Overlay),
            Vec3::new(0.24, 0.5, 1.0 - 2.0 * 0.2 * 0.9)
        ));
        // Hard light keys on the source
        assert!(approx(
            blend(cb, cs, BlendMode::HardLight),
            Vec3::new(screen(0.2, 0.2), 0.5, 0.16)
        ));
    }

    #[test]
    fn test_dodge_and_burn_edges() {
        assert_eq!(blend_channel(0.0, 0.7, BlendMode::ColorDodge), 0.0);
        assert_eq!(blend_channel(0.3, 1.0, BlendMode::ColorDodge), 1.0);
        assert!((blend_channel(0.3, 0.5, BlendMode::ColorDodge) - 0.6).abs() < 1e-6);
        assert_eq!(blend_channel(0.8, 0.9, BlendMode::ColorDodge), 1.0);

        assert_eq!(blend_channel(1.0, 0.0, BlendMode::ColorBurn), 1.0);
        assert_eq!(blend_channel(0.5, 0.0, BlendMode::ColorBurn), 0.0);
        assert!((blend_channel(0.6, 0.8, BlendMode::ColorBurn) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_soft_light_branches() {
        assert!((soft_light(0.5, 0.25) - 0.375).abs() < 1e-6);
        // cb <= 0.25 uses the polynomial
        let d = ((16.0 * 0.2 - 12.0) * 0.2 + 4.0) * 0.2;
        assert!((soft_light(0.2, 0.75) - (0.2 + 0.5 * (d - 0.2))).abs() < 1e-6);
        assert!((soft_light(0.64, 1.0) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_luminosity_keeps_backdrop_chroma() {
        let cb = Vec3::new(0.8, 0.4, 0.2);
        let cs = Vec3::splat(0.3);
        let out = blend(cb, cs, BlendMode::Luminosity);
        assert!((lum(out) - 0.3).abs() < 1e-5);
        // Hue preserved: channel order unchanged
        assert!(out.x > out.y && out.y > out.z);
    }

    #[test]
    fn test_color_and_hue_keep_backdrop_lum() {
        let cb = Vec3::new(0.3, 0.5, 0.4);
        let cs = Vec3::new(0.9, 0.1, 0.2);
        for mode in [BlendMode::Color, BlendMode::Hue, BlendMode::Saturation] {
            let out = blend(cb, cs, mode);
            assert!((lum(out) - lum(cb)).abs() < 1e-5, "{mode}");
            assert!(out.min_element() >= -1e-6 && out.max_element() <= 1.0 + 1e-6);
        }
        let hue = blend(cb, cs, BlendMode::Hue);
        assert!((sat(hue) - sat(cb)).abs() < 1e-5);
    }

    #[test]
    fn test_set_sat_of_gray_is_black() {
        assert_eq!(set_sat(Vec3::splat(0.4), 0.5), Vec3::ZERO);
    }

    #[test]
    fn test_composite_layer_opacity() {
        let cb = Vec3::new(0.2, 0.4, 0.6);
        let cs = Vec3::new(1.0, 0.0, 0.5);
        assert_eq!(composite_layer(cb, cs, BlendMode::Normal, 0.0), cb);
        assert!(approx(composite_layer(cb, cs, BlendMode::Normal, 1.0), cs));
        assert!(approx(
            composite_layer(cb, cs, BlendMode::Normal, 0.25),
            cb * 0.75 + cs * 0.25
        ));
        // Out-of-range opacity is clamped
        assert!(approx(composite_layer(cb, cs, BlendMode::Normal, 3.0), cs));
        assert_eq!(composite_layer(cb, cs, BlendMode::Normal, f32::NAN), cb);
    }

    #[test]
    fn test_scanline_matches_per_pixel() {
        let mut r = vec![0.1, 0.5, 0.9];
        let mut g = vec![0.2, 0.4, 0.6];
        let mut b = vec![0.0, 1.0, 0.3];
        let sr = [0.7, 0.3, 0.5];
        let sg = [0.1, 0.9, 0.5];
        let sb = [0.4, 0.4, 0.8];

        let expected: Vec<Vec3> = (0..3)
            .map(|i| {
                composite_layer(
                    Vec3::new(r[i], g[i], b[i]),
                    Vec3::new(sr[i], sg[i], sb[i]),
                    BlendMode::SoftLight,
                    0.6,
                )
            })
            .collect();

        blend_scanline([&mut r, &mut g, &mut b], [&sr, &sg, &sb], BlendMode::SoftLight, 0.6);
        for (i, e) in expected.iter().enumerate() {
            assert_eq!(Vec3::new(r[i], g[i], b[i]), *e);
        }
    }

    #[test]
    #[should_panic(expected = "scanline length mismatch")]
    fn test_scanline_length_mismatch() {
        let mut r = vec![0.0; 2];
        let mut g = vec![0.0; 2];
        let mut b = vec![0.0; 2];
        blend_scanline([&mut r, &mut g, &mut b], [&[0.0; 2], &[0.0; 2], &[0.0; 3]], BlendMode::Normal, 1.0);
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(BlendMode::iter().count(), 16);
        assert_eq!(BlendMode::ColorDodge.to_string(), "color-dodge");
        assert_eq!("soft-light".parse::<BlendMode>().unwrap(), BlendMode::SoftLight);
        assert_eq!(
            serde_json::to_string(&BlendMode::HardLight).unwrap(),
            "\"hard-light\""
        );
        let separable = BlendMode::iter().filter(|m| m.is_separable()).count();
        assert_eq!(separable, 12);
    }
}
