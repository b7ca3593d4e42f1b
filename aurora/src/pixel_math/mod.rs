//! Pixel math: a small per-pixel expression language over the composite
//! channels and the contributing layers.
//!
//! Each of the three output channels has its own expression. Expressions go
//! through validation (characters, parentheses, identifier allow-list), then
//! a precedence-climbing parser and a compiler that resolves variables to
//! slots and folds constants. Evaluation is a tree interpreter over rows in
//! parallel.
//!
//! Variables: `R`, `G`, `B` (base channels) and, for each layer `n` starting
//! at 1, `L{n}` (mono) plus `R{n}`, `G{n}`, `B{n}`, which fall back to the
//! mono buffer when the layer has no color channels.
//!
//! Failures never produce partial output: the base channels come back
//! unmodified together with a [`PixelMathError`].

mod compile;
mod eval;
mod lexer;
mod parser;
mod validate;


use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::error::Error;
use compile::{CompiledExpr, VariableTable, compile};
use eval::{MissingSample, PixelContext};

pub use compile::{Builtin, CompileError};
pub use validate::{ChannelIssue, ValidationIssue, validate_expression, validate_program};

/// Output channel an expression computes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgramChannel {
    R,
    G,
    B,
}

/// One expression per output channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelMathProgram {
    pub r: String,
    pub g: String,
    pub b: String,
}

impl Default for PixelMathProgram {
    /// Pass-through program.
    fn default() -> Self {
        Self::new("R", "G", "B")
    }
}

impl PixelMathProgram {
    pub fn new(r: impl Into<String>, g: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            r: r.into(),
            g: g.into(),
            b: b.into(),
        }
    }

    /// Same expression for all three channels.
    pub fn uniform(expr: impl Into<String>) -> Self {
        let expr = expr.into();
        Self::new(expr.clone(), expr.clone(), expr)
    }

    pub fn channels(&self) -> [(ProgramChannel, &str); 3] {
        [
            (ProgramChannel::R, self.r.as_str()),
            (ProgramChannel::G, self.g.as_str()),
            (ProgramChannel::B, self.b.as_str()),
        ]
    }
}

/// Buffers of one contributing layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerChannels<'a> {
    pub mono: &'a [f32],
    pub rgb: Option<[&'a [f32]; 3]>,
}

impl<'a> LayerChannels<'a> {
    pub fn mono(mono: &'a [f32]) -> Self {
        Self { mono, rgb: None }
    }
}

/// Everything an expression can read.
#[derive(Debug, Clone)]
pub struct PixelMathInput<'a> {
    pub width: usize,
    pub height: usize,
    /// Base R, G, B channels.
    pub base: [&'a [f32]; 3],
    pub layers: Vec<LayerChannels<'a>>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PixelMathErrorKind {
    Validation,
    Compile,
    Execution,
}

/// Describes why a program was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Pixel math {kind} error in channel {channel} (`{expression}`): {message}")]
pub struct PixelMathError {
    pub kind: PixelMathErrorKind,
    pub channel: ProgramChannel,
    pub expression: String,
    pub message: String,
    /// Character index in `expression`, when known.
    pub position: Option<usize>,
    /// 1-indexed (row, column) of the first failing pixel.
    pub pixel: Option<(usize, usize)>,
}

/// Result of [`apply_pixel_math`].
#[derive(Debug, Clone, PartialEq)]
pub struct PixelMathOutput {
    pub channels: [Vec<f32>; 3],
    pub error: Option<PixelMathError>,
}

impl PixelMathOutput {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Channels on success, [`Error::PixelMath`] otherwise.
    pub fn into_result(self) -> crate::error::Result<[Vec<f32>; 3]> {
        match self.error {
            Some(err) => Err(Error::PixelMath(err)),
            None => Ok(self.channels),
        }
    }
}

/// Variable names available with `layer_count` layers, in slot order.
pub fn allowed_variables(layer_count: usize) -> Vec<String> {
    let mut names: Vec<String> = ["R", "G", "B"].iter().map(|s| s.to_string()).collect();
    for n in 1..=layer_count {
        names.extend(["L", "R", "G", "B"].iter().map(|p| format!("{p}{n}")));
    }
    names
}

/// Validate, compile and evaluate `program` for every pixel.
pub fn apply_pixel_math(input: &PixelMathInput<'_>, program: &PixelMathProgram) -> PixelMathOutput {
    let unmodified = |error: PixelMathError| {
        tracing::warn!("{error}");
        PixelMathOutput {
            channels: input.base.map(<[f32]>::to_vec),
            error: Some(error),
        }
    };

    if let Err(issues) = validate_program(program, input.layers.len())
        && let Some(first) = issues.into_iter().next()
    {
        return unmodified(PixelMathError {
            kind: PixelMathErrorKind::Validation,
            channel: first.channel,
            expression: expression_of(program, first.channel).to_string(),
            message: first.issue.to_string(),
            position: first.issue.position(),
            pixel: None,
        });
    }

    let names = allowed_variables(input.layers.len());
    let table = VariableTable::new(names.iter().map(String::as_str));
    let mut compiled = Vec::with_capacity(3);
    for (channel, expr) in program.channels() {
        match compile(expr, &table) {
            Ok(c) => compiled.push(c),
            Err(err) => {
                return unmodified(PixelMathError {
                    kind: PixelMathErrorKind::Compile,
                    channel,
                    expression: expr.to_string(),
                    message: err.to_string(),
                    position: Some(err.position()),
                    pixel: None,
                });
            }
        }
    }

    let sources = variable_sources(input);
    match evaluate(&compiled, &sources, input.width, input.height) {
        Ok(channels) => {
            tracing::debug!(
                "Pixel math applied to {}x{} pixels",
                input.width,
                input.height
            );
            PixelMathOutput {
                channels,
                error: None,
            }
        }
        Err(failure) => {
            let channel = program.channels()[failure.channel].0;
            let slot = failure.missing.slot;
            unmodified(PixelMathError {
                kind: PixelMathErrorKind::Execution,
                channel,
                expression: expression_of(program, channel).to_string(),
                message: format!(
                    "variable `{}` has {} samples, pixel {} is out of range",
                    names.get(slot).map_or("?", String::as_str),
                    sources.get(slot).map_or(0, |s| s.len()),
                    failure.index
                ),
                position: None,
                pixel: Some((failure.row + 1, failure.col + 1)),
            })
        }
    }
}

fn expression_of(program: &PixelMathProgram, channel: ProgramChannel) -> &str {
    match channel {
        ProgramChannel::R => &program.r,
        ProgramChannel::G => &program.g,
        ProgramChannel::B => &program.b,
    }
}

/// Buffers in slot order, matching [`allowed_variables`].
fn variable_sources<'a>(input: &PixelMathInput<'a>) -> Vec<&'a [f32]> {
    let mut sources: Vec<&[f32]> = input.base.to_vec();
    for layer in &input.layers {
        sources.push(layer.mono);
        match layer.rgb {
            Some(rgb) => sources.extend(rgb),
            None => sources.extend([layer.mono; 3]),
        }
    }
    sources
}

#[derive(Debug)]
struct ExecutionFailure {
    row: usize,
    col: usize,
    index: usize,
    channel: usize,
    missing: MissingSample,
}

fn evaluate(
    compiled: &[CompiledExpr],
    sources: &[&[f32]],
    width: usize,
    height: usize,
) -> Result<[Vec<f32>; 3], ExecutionFailure> {
    let len = width * height;
    let mut out: [Vec<f32>; 3] = std::array::from_fn(|_| vec![0.0; len]);
    if len == 0 {
        return Ok(out);
    }

    let [out_r, out_g, out_b] = &mut out;
    let row_failures: Vec<Option<ExecutionFailure>> = out_r
        .par_chunks_mut(width)
        .zip(out_g.par_chunks_mut(width))
        .zip(out_b.par_chunks_mut(width))
        .enumerate()
        .map(|(row, ((r, g), b))| {
            let mut rows = [r, g, b];
            for col in 0..width {
                let index = row * width + col;
                let ctx = PixelContext { sources, index };
                for (channel, expr) in compiled.iter().enumerate() {
                    match expr.eval_pixel(&ctx) {
                        Ok(v) => rows[channel][col] = v,
                        Err(missing) => {
                            return Some(ExecutionFailure {
                                row,
                                col,
                                index,
                                channel,
                                missing,
                            });
                        }
                    }
                }
            }
            None
        })
        .collect();

    // Rows are collected in order, so the first failure is the row-major first
    match row_failures.into_iter().flatten().next() {
        Some(failure) => Err(failure),
        None => Ok(out),
    }
}
