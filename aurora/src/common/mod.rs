//! Common utilities for aurora.

pub mod buffer2;
pub mod parallel;

pub use buffer2::Buffer2;
