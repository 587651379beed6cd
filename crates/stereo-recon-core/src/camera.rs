//! Pinhole camera with the five-coefficient radial/tangential lens model.

use crate::TermCriteria;
use nalgebra::{Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Distortion coefficients in `k1 k2 p1 p2 k3` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub const fn zero() -> Self {
        Self {
            k1: 0.0,
            k2: 0.0,
            p1: 0.0,
            p2: 0.0,
            k3: 0.0,
        }
    }

    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Apply the lens model to normalized image coordinates.
    #[inline]
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xd = x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (xd, yd)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    ///
    /// `tolerance` is the residual (in normalized units) below which the
    /// estimate is accepted.
    pub fn undistort(&self, xd: f64, yd: f64, max_iters: usize, tolerance: f64) -> (f64, f64) {
        let (mut x, mut y) = (xd, yd);
        for _ in 0..max_iters {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if radial.abs() < 1e-12 {
                break;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (xd - dx) / radial;
            y = (yd - dy) / radial;

            let (rx, ry) = self.distort(x, y);
            if ((rx - xd).powi(2) + (ry - yd).powi(2)).sqrt() < tolerance {
                break;
            }
        }
        (x, y)
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|c| *c == 0.0)
    }
}

/// Zero-skew pinhole camera: `K = [fx 0 cx; 0 fy cy; 0 0 1]` plus lens distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: Distortion,
}

impl PinholeCamera {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, distortion: Distortion) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion,
        }
    }

    /// Build from a 3x3 camera matrix; skew is ignored.
    pub fn from_matrix(k: &Matrix3<f64>, distortion: Distortion) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)], distortion)
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Project a point given in the camera frame to pixel coordinates.
    ///
    /// Points on or behind the image plane produce non-finite or mirrored
    /// coordinates; callers solving for poses rely on that to reject steps.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Point2<f64> {
        let x = p.x / p.z;
        let y = p.y / p.z;
        let (xd, yd) = self.distortion.distort(x, y);
        Point2::new(self.fx * xd + self.cx, self.fy * yd + self.cy)
    }

    /// Pixel to undistorted normalized coordinates.
    pub fn undistort_normalized(
        &self,
        pixel: &Point2<f64>,
        criteria: &TermCriteria,
    ) -> Point2<f64> {
        let xd = (pixel.x - self.cx) / self.fx;
        let yd = (pixel.y - self.cy) / self.fy;
        if self.distortion.is_zero() {
            return Point2::new(xd, yd);
        }
        // epsilon is expressed in pixels
        let tolerance = criteria.epsilon / self.fx.abs().max(self.fy.abs()).max(1e-12);
        let (x, y) = self
            .distortion
            .undistort(xd, yd, criteria.max_iters, tolerance);
        Point2::new(x, y)
    }

    /// Undistort a pixel, rotate its ray by `rotation` and reproject it with
    /// the ideal camera `new_k`.
    pub fn undistort_pixel(
        &self,
        pixel: &Point2<f64>,
        rotation: &Matrix3<f64>,
        new_k: &Matrix3<f64>,
        criteria: &TermCriteria,
    ) -> Point2<f64> {
        let n = self.undistort_normalized(pixel, criteria);
        let ray = rotation * Vector3::new(n.x, n.y, 1.0);
        let v = new_k * (ray / ray.z);
        Point2::new(v.x, v.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            700.0,
            705.0,
            320.0,
            240.0,
            Distortion::from_array([-0.12, 0.05, 0.001, -0.0005, 0.0]),
        )
    }

    #[test]
    fn zero_distortion_is_identity() {
        let d = Distortion::zero();
        assert_eq!((0.3, -0.2), d.distort(0.3, -0.2));
        assert!(d.is_zero());
    }

    #[test]
    fn project_on_axis_hits_principal_point() {
        let cam = camera();
        let p = cam.project(&Point3::new(0.0, 0.0, 2.0));
        assert_relative_eq!(p.x, 320.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 240.0, epsilon = 1e-12);
    }

    #[test]
    fn undistort_inverts_distort() {
        let cam = camera();
        let criteria = TermCriteria::new(50, 1e-6);
        for (x, y) in [(0.1, 0.2), (-0.35, 0.25), (0.4, -0.3)] {
            let pixel = cam.project(&Point3::new(x, y, 1.0));
            let n = cam.undistort_normalized(&pixel, &criteria);
            assert_relative_eq!(n.x, x, epsilon = 1e-7);
            assert_relative_eq!(n.y, y, epsilon = 1e-7);
        }
    }

    #[test]
    fn undistort_pixel_with_identity_rotation_recovers_ideal_projection() {
        let cam = camera();
        let ideal = PinholeCamera::new(700.0, 705.0, 320.0, 240.0, Distortion::zero());
        let pt = Point3::new(0.2, -0.1, 1.5);
        let pixel = cam.project(&pt);
        let out = cam.undistort_pixel(
            &pixel,
            &Matrix3::identity(),
            &ideal.k_matrix(),
            &TermCriteria::new(50, 1e-6),
        );
        let expected = ideal.project(&pt);
        assert_relative_eq!(out.x, expected.x, epsilon = 1e-4);
        assert_relative_eq!(out.y, expected.y, epsilon = 1e-4);
    }

    #[test]
    fn k_matrix_round_trips() {
        let cam = camera();
        let back = PinholeCamera::from_matrix(&cam.k_matrix(), cam.distortion);
        assert_eq!(cam, back);
    }
}
