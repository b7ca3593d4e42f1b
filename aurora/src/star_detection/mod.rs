//! Star detection: background estimation, thresholding, connected
//! components, deblending and shape measurement.

mod background;
mod config;
mod deblend;
mod detector;
mod labeling;
mod measure;
mod star;

#[cfg(test)]
mod tests;

pub use background::BackgroundMap;
pub use config::{Connectivity, DetectionProfile, StarDetectionConfig};
pub use detector::{
    AsyncDetectOptions, DEFAULT_CHUNK_ROWS, ProgressFn, StarDetector, detect_stars,
    detect_stars_async,
};
pub use star::{Star, sort_by_flux};
