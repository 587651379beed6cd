//! Core types and numerics shared by the `stereo-recon-*` crates.
//!
//! This crate is purely geometric: a pinhole camera with the five-term
//! radial/tangential distortion model, rotation-vector helpers, homography
//! estimation, a dense Levenberg-Marquardt solver and the termination
//! criterion every iterative stage shares. It knows nothing about chessboards
//! or disparity.

mod camera;
mod criteria;
mod geometry;
mod homography;
mod lm;
mod logger;
mod progress;
mod raster;

pub use camera::{Distortion, ImageSize, PinholeCamera};
pub use criteria::TermCriteria;
pub use geometry::{rodrigues, rotation_angle, rotation_to_rvec, skew, Pose};
pub use homography::{estimate_homography, Homography};
pub use lm::{
    fd_step, numeric_jacobian, LeastSquaresProblem, LevenbergMarquardt, LmReport, SolverError,
};
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use raster::{luma_bt601, sample_bilinear, GrayImageView};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
