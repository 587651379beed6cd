use std::path::PathBuf;
use stereo_recon_calib::{CalibrationError, StoreError};
use stereo_recon_chessboard::PatternError;
use stereo_recon_cloud::CloudError;
use stereo_recon_core::ImageSize;
use stereo_recon_disparity::DisparityError;

/// Errors produced by the file-system pipelines.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("left and right inputs differ in count: {left} vs {right}")]
    ImageCountMismatch { left: usize, right: usize },

    #[error("{what} is {found}, expected {expected}")]
    ImageDimensionMismatch {
        what: String,
        expected: ImageSize,
        found: ImageSize,
    },

    #[error("image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no Q matrix: pass a stereo calibration or a Q file")]
    MissingQ,

    #[error("rectification requested without a stereo calibration")]
    MissingStereoCalibration,

    #[error("config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Disparity(#[from] DisparityError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }
}
