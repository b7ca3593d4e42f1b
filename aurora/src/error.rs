//! Error types for the compositing core.

use thiserror::Error;

use crate::pixel_math::PixelMathError;

/// Errors returned by calibration, detection, registration and rendering.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Dimension mismatch for {what}: expected {expected} samples, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Layer {layer} has {count} control points, expected 2 or 3")]
    InvalidControlPoints { layer: usize, count: usize },

    #[error("Alignment failed: {0}")]
    Alignment(String),

    #[error("Aligned layers have no common overlap")]
    EmptyOverlap,

    #[error(transparent)]
    PixelMath(#[from] PixelMathError),
}

impl Error {
    /// True when the operation was stopped through its cancel token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Checks that `actual` has the expected sample count.
#[inline]
pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            what,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_message() {
        let err = Error::DimensionMismatch {
            what: "dark frame",
            expected: 100,
            actual: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("dark frame"));
        assert!(msg.contains("100"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::EmptyOverlap.is_cancelled());
        assert_eq!(Error::Cancelled.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_ensure_len() {
        assert!(ensure_len("flat", 4, 4).is_ok());
        let err = ensure_len("flat", 4, 3).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }
}
