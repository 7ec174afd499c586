//! Error type shared by every pipeline stage.

use std::io;

use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Error, Debug)]
pub enum AssayError {
    #[error("No regions detected in the image")]
    NoRegionsDetected,
    #[error("Region {object} has zero area")]
    DegenerateRegion { object: usize },
    #[error("At least {required} distinct calibration concentrations are needed, got {found}")]
    InsufficientCalibrationPoints { required: usize, found: usize },
    #[error("Invalid concentration for object {object}: {input:?}")]
    InvalidConcentrationInput { object: usize, input: String },
    #[error("Concentration required for object {object}")]
    MissingConcentration { object: usize },
    #[error("Object {object} is not a detected region (available: {available:?})")]
    UnknownObjectNotFound { object: usize, available: Vec<usize> },
    #[error("Calibration names no unknown sample")]
    NoUnknown,
    #[error("Calibration names more than one unknown sample: {0:?}")]
    DuplicateUnknown(Vec<usize>),
    #[error("Curve fit did not converge after {iterations} iterations")]
    FitDidNotConverge { iterations: usize },
    #[error("Operation requires stage {expected}, run is at {actual}")]
    InvalidStage { expected: Stage, actual: Stage },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssayError>;
