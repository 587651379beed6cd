//! Point clouds from disparity maps.
//!
//! [`project`] lifts every pixel through the disparity-to-depth matrix `Q`,
//! [`valid_mask`] drops pixels at the map's minimum (the matchers' "no
//! match" value), [`attach_color`] pairs the survivors with the left image
//! colors and [`write_ply`] exports the result.

mod error;
mod ply;
mod project;

pub use error::CloudError;
pub use ply::{write_ply, write_ply_to};
pub use project::{attach_color, project, reconstruct, valid_mask};

use nalgebra::Point3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColoredPoint {
    pub position: Point3<f32>,
    pub color: [u8; 3],
}

/// Unordered colored points; duplicates allowed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<ColoredPoint>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
