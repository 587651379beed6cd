//! Extrinsic calibration of a stereo rig with fixed intrinsics.

use crate::bundle::{Bundle, ViewModel};
use crate::error::CalibrationError;
use crate::mono::MIN_OBSERVATIONS;
use crate::pose::solve_planar_pose;
use crate::rectify::{stereo_rectify, Rectification, RectifyOptions};
use log::{debug, info};
use nalgebra::{DVector, Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use stereo_recon_chessboard::ChessboardObservation;
use stereo_recon_core::{
    rodrigues, rotation_to_rvec, skew, ImageSize, LevenbergMarquardt, LmReport, PinholeCamera,
    Pose, TermCriteria,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Rigid transform from the left to the right camera frame,
/// `X_right = R * X_left + T`, with its epipolar matrices.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoExtrinsics {
    pub r: Matrix3<f64>,
    pub t: Vector3<f64>,
    /// Essential matrix `[T]x R`.
    pub e: Matrix3<f64>,
    /// Fundamental matrix `K2⁻ᵀ E K1⁻¹`, scaled so `F[2,2] = 1` when possible.
    pub f: Matrix3<f64>,
}

impl StereoExtrinsics {
    pub fn from_rt(
        r: Matrix3<f64>,
        t: Vector3<f64>,
        left: &PinholeCamera,
        right: &PinholeCamera,
    ) -> Result<Self, CalibrationError> {
        let e = skew(&t) * r;
        let singular = || CalibrationError::Computation("singular camera matrix".to_string());
        let k1_inv = left.k_matrix().try_inverse().ok_or_else(singular)?;
        let k2_inv = right.k_matrix().try_inverse().ok_or_else(singular)?;
        let mut f = k2_inv.transpose() * e * k1_inv;
        if f[(2, 2)].abs() > f64::EPSILON {
            f /= f[(2, 2)];
        }
        Ok(Self { r, t, e, f })
    }

    pub fn baseline(&self) -> f64 {
        self.t.norm()
    }
}

#[derive(Clone, Debug)]
pub struct StereoCalibration {
    pub extrinsics: StereoExtrinsics,
    /// RMS over both cameras' reprojections, in pixels.
    pub rms: f64,
    /// Board pose relative to the left camera, per pair.
    pub left_poses: Vec<Pose>,
    pub report: LmReport,
}

struct StereoModel<'a> {
    left_cam: &'a PinholeCamera,
    right_cam: &'a PinholeCamera,
    left: &'a [ChessboardObservation],
    right: &'a [ChessboardObservation],
}

impl ViewModel for StereoModel<'_> {
    fn num_global(&self) -> usize {
        6
    }

    fn num_local(&self) -> usize {
        6
    }

    fn num_views(&self) -> usize {
        self.left.len()
    }

    fn view_rows(&self, view: usize) -> usize {
        4 * self.left[view].len()
    }

    fn view_residuals(&self, global: &[f64], local: &[f64], view: usize, out: &mut [f64]) {
        let rel = Pose::from_slice(global);
        let board = Pose::from_slice(local);
        let (rr, rb) = (rel.rotation(), board.rotation());
        let (l, r) = (&self.left[view], &self.right[view]);
        let n = l.len();

        for k in 0..n {
            let xl = rb * l.object_points[k].coords + board.tvec;
            let xr = rr * xl + rel.tvec;
            let pl = self.left_cam.project(&Point3::from(xl));
            let pr = self.right_cam.project(&Point3::from(xr));
            out[2 * k] = pl.x - l.image_points[k].x;
            out[2 * k + 1] = pl.y - l.image_points[k].y;
            out[2 * (n + k)] = pr.x - r.image_points[k].x;
            out[2 * (n + k) + 1] = pr.y - r.image_points[k].y;
        }
    }
}

/// Closest rotation to the sum of `rotations`.
fn average_rotation(rotations: &[Matrix3<f64>]) -> Option<Matrix3<f64>> {
    let sum: Matrix3<f64> = rotations.iter().sum();
    let svd = sum.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }
    Some(r)
}

#[derive(Clone, Debug)]
pub struct StereoCalibrator {
    pub criteria: TermCriteria,
    pub min_observations: usize,
}

impl Default for StereoCalibrator {
    fn default() -> Self {
        Self::new(TermCriteria::default())
    }
}

impl StereoCalibrator {
    pub fn new(criteria: TermCriteria) -> Self {
        Self {
            criteria,
            min_observations: MIN_OBSERVATIONS,
        }
    }

    /// Solve for `R, T` between two calibrated cameras.
    ///
    /// `left[i]` and `right[i]` must observe the same board placement. Board
    /// poses relative to the left camera are estimated jointly and returned
    /// as a by-product.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(pairs = left.len()))
    )]
    pub fn calibrate(
        &self,
        left: &[ChessboardObservation],
        right: &[ChessboardObservation],
        left_cam: &PinholeCamera,
        right_cam: &PinholeCamera,
        image_size: ImageSize,
    ) -> Result<StereoCalibration, CalibrationError> {
        let pairs = left.len().min(right.len());
        if pairs < self.min_observations {
            return Err(CalibrationError::InsufficientObservations {
                found: pairs,
                required: self.min_observations,
            });
        }
        if left.len() != right.len() {
            return Err(CalibrationError::Computation(format!(
                "{} left observations but {} right",
                left.len(),
                right.len()
            )));
        }
        for (index, (l, r)) in left.iter().zip(right).enumerate() {
            if l.len() != r.len() || l.object_points != r.object_points {
                return Err(CalibrationError::CornerCountMismatch {
                    index,
                    left: l.len(),
                    right: r.len(),
                });
            }
        }
        debug!("stereo calibration over {pairs} pairs at {image_size}");

        // per-pair relative pose as the initial guess
        let mut left_poses = Vec::with_capacity(pairs);
        let mut rotations = Vec::with_capacity(pairs);
        let mut translations = Vec::with_capacity(pairs);
        for (l, r) in left.iter().zip(right) {
            let pl =
                solve_planar_pose(left_cam, &l.object_points, &l.image_points, &self.criteria)?;
            let pr =
                solve_planar_pose(right_cam, &r.object_points, &r.image_points, &self.criteria)?;
            let r_rel = pr.rotation() * pl.rotation().transpose();
            translations.push(pr.tvec - r_rel * pl.tvec);
            rotations.push(r_rel);
            left_poses.push(pl);
        }
        let r0 = average_rotation(&rotations)
            .ok_or_else(|| CalibrationError::Computation("rotation averaging failed".to_string()))?;
        let t0 = translations.iter().sum::<Vector3<f64>>() / pairs as f64;
        debug!("initial T = [{:.5}, {:.5}, {:.5}]", t0.x, t0.y, t0.z);

        let mut params = Vec::with_capacity(6 * (pairs + 1));
        params.extend_from_slice(&Pose::from_rt(&r0, t0).to_array());
        for p in &left_poses {
            params.extend_from_slice(&p.to_array());
        }
        let mut params = DVector::from_vec(params);

        let model = StereoModel {
            left_cam,
            right_cam,
            left,
            right,
        };
        let bundle = Bundle::new(&model);
        let report = LevenbergMarquardt::new(self.criteria).minimize(&bundle, &mut params)?;

        let p = params.as_slice();
        let r = rodrigues(&Vector3::new(p[0], p[1], p[2]));
        let t = Vector3::new(p[3], p[4], p[5]);
        let left_poses = p[6..].chunks_exact(6).map(Pose::from_slice).collect();

        let observations: usize = left.iter().map(|o| 2 * o.len()).sum();
        let rms = (report.final_cost / observations as f64).sqrt();
        info!(
            "stereo rms={:.4}px |T|={:.5} angle={:.3}deg ({} iterations)",
            rms,
            t.norm(),
            rotation_to_rvec(&r).norm().to_degrees(),
            report.iterations
        );

        Ok(StereoCalibration {
            extrinsics: StereoExtrinsics::from_rt(r, t, left_cam, right_cam)?,
            rms,
            left_poses,
            report,
        })
    }

    /// Zero-disparity rectification for the calibrated rig, undistorting
    /// with [`Self::criteria`].
    pub fn rectify(
        &self,
        left_cam: &PinholeCamera,
        right_cam: &PinholeCamera,
        image_size: ImageSize,
        extrinsics: &StereoExtrinsics,
        options: &RectifyOptions,
    ) -> Result<Rectification, CalibrationError> {
        stereo_rectify(
            left_cam,
            right_cam,
            image_size,
            &extrinsics.r,
            &extrinsics.t,
            options,
            &self.criteria,
        )
    }
}
