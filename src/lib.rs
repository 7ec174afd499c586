//! Quantitative colorimetric readout for sensor strips.
//!
//! An image of a strip is reduced to one signal per detected region, the
//! signals are normalized against the strongest region, a four-parameter
//! logistic curve is fit to the regions of known concentration and the
//! curve is inverted at the unknown region's response.

pub mod config;
pub mod data;
pub mod error;
pub mod log;
pub mod pipeline;

pub use config::AssayConfig;
pub use data::calibration::{CalibrationInput, ConcentrationValue};
pub use data::detections::{DetectionFile, RegionDetector};
pub use data::region::{BoundingBox, PixelMask, Region, RegionGeometry};
pub use error::{AssayError, Result};
pub use pipeline::estimation::{Classification, ConcentrationEstimate, RangeStatus};
pub use pipeline::fitting::{FitStrategy, FittedModel};
pub use pipeline::report::AssayReport;
pub use pipeline::worker::AssayWorker;
pub use pipeline::{AssayRun, Stage};
