use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Rotation matrix from a rotation vector (axis scaled by angle).
#[inline]
pub fn rodrigues(rvec: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*rvec).into_inner()
}

/// Rotation vector of the closest proper rotation to `r`.
pub fn rotation_to_rvec(r: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(r).scaled_axis()
}

/// Angle (radians) of the rotation `r`.
pub fn rotation_angle(r: &Matrix3<f64>) -> f64 {
    rotation_to_rvec(r).norm()
}

/// Cross-product matrix: `skew(a) * b == a.cross(&b)`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Rigid transform `X_cam = R(rvec) * X + tvec`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self { rvec, tvec }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    pub fn from_rt(r: &Matrix3<f64>, t: Vector3<f64>) -> Self {
        Self::new(rotation_to_rvec(r), t)
    }

    /// Six parameters `[rx ry rz tx ty tz]`.
    pub fn from_slice(p: &[f64]) -> Self {
        Self::new(
            Vector3::new(p[0], p[1], p[2]),
            Vector3::new(p[3], p[4], p[5]),
        )
    }

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.rvec.x,
            self.rvec.y,
            self.rvec.z,
            self.tvec.x,
            self.tvec.y,
            self.tvec.z,
        ]
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        rodrigues(&self.rvec)
    }

    #[inline]
    pub fn transform(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation() * p.coords + self.tvec)
    }

    /// `other ∘ self`: apply `self` first, then `other`.
    pub fn then(&self, other: &Pose) -> Pose {
        let r = other.rotation() * self.rotation();
        let t = other.rotation() * self.tvec + other.tvec;
        Pose::from_rt(&r, t)
    }
}
