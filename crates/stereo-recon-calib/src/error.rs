use std::path::PathBuf;
use stereo_recon_core::{ImageSize, SolverError};

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("need at least {required} observations, got {found}")]
    InsufficientObservations { found: usize, required: usize },

    #[error("image size mismatch: expected {expected}, got {found}")]
    ImageDimensionMismatch { expected: ImageSize, found: ImageSize },

    #[error("observation {index} pairs {left} left corners with {right} right corners")]
    CornerCountMismatch {
        index: usize,
        left: usize,
        right: usize,
    },

    #[error("calibration failed: {0}")]
    Computation(String),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("calibration file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("calibration file has no `{0}` entry")]
    MissingKey(String),

    #[error("calibration entry `{key}` is malformed: {reason}")]
    Malformed { key: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
