//! Camera calibration for the stereo reconstruction pipeline.
//!
//! - [`MonocularCalibrator`] fits one camera's intrinsics and distortion.
//! - [`StereoCalibrator`] fits the rigid transform between two calibrated
//!   cameras and derives the essential and fundamental matrices.
//! - [`stereo_rectify`] computes rectifying rotations, projections and the
//!   disparity-to-depth matrix; [`init_rectify_map`] and [`remap`] apply them.
//! - [`store`] persists the results as keyed JSON matrices.
//!
//! Every fit needs at least [`MIN_OBSERVATIONS`] views or pairs.

mod bundle;
mod error;
mod mono;
mod pose;
mod rectify;
mod remap;
mod stereo;
pub mod store;

pub use error::{CalibrationError, StoreError};
pub use mono::{CameraIntrinsics, MonoCalibration, MonocularCalibrator, MIN_OBSERVATIONS};
pub use pose::solve_planar_pose;
pub use rectify::{stereo_rectify, Rectification, RectificationTransform, RectifyOptions, Roi};
pub use remap::{init_rectify_map, remap, RectifyMap};
pub use stereo::{StereoCalibration, StereoCalibrator, StereoExtrinsics};
pub use store::{
    load_mono, load_q, load_stereo, save_mono, save_stereo, CalibrationDocument, StereoArtifact,
    StoredMatrix,
};
