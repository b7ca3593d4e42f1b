//! Numeric core of an astronomical image-compositing pipeline.
//!
//! - [`calibration`]: dark/bias/flat correction and master frames
//! - [`star_detection`]: background, thresholding, deblending and shape metrics
//! - [`matching`]: robust linear intensity match and brightness balance
//! - [`registration`]: framing policy around an injected [`registration::Aligner`]
//! - [`composite`]: blend modes and the layer renderer
//! - [`pixel_math`]: a small allow-listed per-pixel expression language
//!
//! Nothing here performs file or network I/O. Inputs are borrowed row-major
//! `f32` buffers; outputs are freshly allocated.

pub mod calibration;
pub mod common;
pub mod composite;
pub mod error;
pub mod matching;
pub mod math;
pub mod pixel_math;
pub mod registration;
pub mod star_detection;

#[cfg(test)]
pub(crate) mod testing;

pub use ::common::CancelToken;
pub use error::{Error, Result};

pub use calibration::{
    CalibrationFrames, CalibrationMasters, apply_flat, calibrate_frame, create_master_dark,
    create_master_flat, normalize_flat, subtract_bias, subtract_dark,
};
pub use composite::{
    BlendMode, Channel, ColorSpace, CompositeLayer, DisplayMode, RenderMode, RenderOptions,
    RenderRequest, RenderResult, render_composite, render_composite_blocking,
};
pub use matching::{
    BalancedLayers, BrightnessGain, LinearMatch, apply_linear_match, balance_layer_brightness,
    estimate_brightness_gain, estimate_linear_match,
};
pub use pixel_math::{
    PixelMathError, PixelMathErrorKind, PixelMathInput, PixelMathOutput, PixelMathProgram,
    apply_pixel_math, validate_expression, validate_program,
};
pub use registration::{
    AlignMode, AlignRequest, AlignedLayer, Aligner, ControlPoints, Framing, Registration,
    align_layers,
};
pub use star_detection::{
    AsyncDetectOptions, DetectionProfile, Star, StarDetectionConfig, StarDetector, detect_stars,
    detect_stars_async,
};
