//! Stereo camera calibration and dense 3D reconstruction.
//!
//! This crate ties the `stereo-recon-*` crates together:
//! - re-exports of the underlying crates under short module names
//! - [`pipeline`]: folder and file based calibration and reconstruction runs
//! - [`ReconstructionConfig`]: the JSON-serializable run configuration
//! - (feature `cli`) the `stereo-recon` command-line tool
//!
//! ## Quickstart
//!
//! ```no_run
//! use stereo_recon::pipeline::{reconstruct_files, ReconstructRequest};
//! use stereo_recon::{core::LogProgress, ReconstructionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = ReconstructRequest {
//!     left_image: "left.png".into(),
//!     right_image: "right.png".into(),
//!     calibration: Some("stereo.json".into()),
//!     rectify: true,
//!     ply_out: "cloud.ply".into(),
//!     ..ReconstructRequest::default()
//! };
//! let config = ReconstructionConfig::default();
//! let result = reconstruct_files(&request, &config, &LogProgress::default())?;
//! println!("{} points", result.cloud.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `stereo_recon::core`: camera model, rotations, solver, logging, progress.
//! - `stereo_recon::chessboard`: pattern description and corner detection.
//! - `stereo_recon::calib`: mono/stereo calibration, rectification, artifacts.
//! - `stereo_recon::disparity`: SGM and SAD block matching.
//! - `stereo_recon::cloud`: reprojection and PLY export.

pub use stereo_recon_calib as calib;
pub use stereo_recon_chessboard as chessboard;
pub use stereo_recon_cloud as cloud;
pub use stereo_recon_core as core;
pub use stereo_recon_disparity as disparity;

mod config;
mod error;
pub mod pipeline;

pub use config::ReconstructionConfig;
pub use error::PipelineError;
pub use pipeline::{DetectionReport, Reconstruction, ReconstructRequest};
