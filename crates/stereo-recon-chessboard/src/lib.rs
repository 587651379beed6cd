//! Chessboard detection for camera calibration.
//!
//! Corner candidates come from the ChESS detector (`chess-corners`). They
//! are linked into a 4-connected grid, the exact `cols x rows` inner-corner
//! window is extracted and ordered row-major to match
//! [`CalibrationPattern::object_points`], and each corner is refined to
//! sub-pixel accuracy.
//!
//! ```no_run
//! use stereo_recon_chessboard::{CalibrationPattern, ChessboardDetector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let img = image::open("left01.png")?.to_luma8();
//! let pattern = CalibrationPattern::new(9, 6, 0.025)?;
//! let found = ChessboardDetector::default().detect(&img, &pattern);
//! println!("found: {}", found.is_some());
//! # Ok(())
//! # }
//! ```

mod detector;
mod draw;
mod gridgraph;
mod params;
mod pattern;
mod subpix;

pub use detector::ChessboardDetector;
pub use draw::draw_corners;
pub use gridgraph::{GridGraph, NeighborDirection, NodeNeighbor};
pub use params::{ChessboardParams, GridGraphParams, SubPixParams};
pub use pattern::{CalibrationPattern, ChessboardObservation, ObservedCorners, PatternError};
pub use subpix::{refine_corner, refine_corners};
