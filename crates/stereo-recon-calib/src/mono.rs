//! Single-camera calibration from planar chessboard views.
//!
//! Initialization follows the planar-homography approach: the principal
//! point starts at the image centre, focal lengths come from the
//! orthogonality of each view's vanishing directions, and each board pose is
//! decomposed from its homography. A joint Levenberg-Marquardt fit then
//! refines `fx fy cx cy`, the five distortion coefficients and every pose.

use crate::bundle::{Bundle, ViewModel};
use crate::error::CalibrationError;
use crate::pose::pose_from_homography;
use log::{debug, info};
use nalgebra::{DVector, Matrix2, Matrix3, Point2, Vector2};
use serde::{Deserialize, Serialize};
use stereo_recon_chessboard::ChessboardObservation;
use stereo_recon_core::{
    estimate_homography, Distortion, ImageSize, LevenbergMarquardt, LmReport, PinholeCamera, Pose,
    TermCriteria,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Minimum number of usable views (or stereo pairs) for a fit.
pub const MIN_OBSERVATIONS: usize = 15;

const INTRINSIC_PARAMS: usize = 9;

/// Fitted camera model with its RMS reprojection error (pixels).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub camera: PinholeCamera,
    pub rms: f64,
    /// Size of the calibration images; `None` for artifacts that predate it.
    pub image_size: Option<ImageSize>,
}

impl CameraIntrinsics {
    pub fn k_matrix(&self) -> Matrix3<f64> {
        self.camera.k_matrix()
    }

    pub fn distortion(&self) -> Distortion {
        self.camera.distortion
    }
}

#[derive(Clone, Debug)]
pub struct MonoCalibration {
    pub intrinsics: CameraIntrinsics,
    /// Board pose per observation, in input order.
    pub poses: Vec<Pose>,
    pub per_view_rms: Vec<f64>,
    pub report: LmReport,
}

#[derive(Clone, Debug)]
pub struct MonocularCalibrator {
    pub criteria: TermCriteria,
    pub min_observations: usize,
}

impl Default for MonocularCalibrator {
    fn default() -> Self {
        Self::new(TermCriteria::default())
    }
}

fn camera_params(c: &PinholeCamera) -> [f64; INTRINSIC_PARAMS] {
    let d = c.distortion.to_array();
    [c.fx, c.fy, c.cx, c.cy, d[0], d[1], d[2], d[3], d[4]]
}

fn camera_from_params(p: &[f64]) -> PinholeCamera {
    PinholeCamera::new(
        p[0],
        p[1],
        p[2],
        p[3],
        Distortion::from_array([p[4], p[5], p[6], p[7], p[8]]),
    )
}

struct MonoModel<'a> {
    views: &'a [ChessboardObservation],
}

impl ViewModel for MonoModel<'_> {
    fn num_global(&self) -> usize {
        INTRINSIC_PARAMS
    }

    fn num_local(&self) -> usize {
        6
    }

    fn num_views(&self) -> usize {
        self.views.len()
    }

    fn view_rows(&self, view: usize) -> usize {
        2 * self.views[view].len()
    }

    fn view_residuals(&self, global: &[f64], local: &[f64], view: usize, out: &mut [f64]) {
        let camera = camera_from_params(global);
        let pose = Pose::from_slice(local);
        let r = pose.rotation();
        let obs = &self.views[view];
        for (k, (obj, img)) in obs.object_points.iter().zip(&obs.image_points).enumerate() {
            let pc = nalgebra::Point3::from(r * obj.coords + pose.tvec);
            let proj = camera.project(&pc);
            out[2 * k] = proj.x - img.x;
            out[2 * k + 1] = proj.y - img.y;
        }
    }
}

/// Focal lengths with a fixed principal point, from per-view homographies.
fn init_focal(homographies: &[Matrix3<f64>], cx: f64, cy: f64) -> Option<(f64, f64)> {
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();

    for h in homographies {
        let h = shift * h;
        let h1 = h.column(0).into_owned();
        let h2 = h.column(1).into_owned();
        let d1 = (h1 + h2) * 0.5;
        let d2 = (h1 - h2) * 0.5;
        let (h1, h2) = (h1.normalize(), h2.normalize());
        let (d1, d2) = (d1.normalize(), d2.normalize());

        // both pairs of vanishing directions are orthogonal under K⁻ᵀK⁻¹
        for (a, b) in [(h1, h2), (d1, d2)] {
            let row = Vector2::new(a.x * b.x, a.y * b.y);
            let rhs = -a.z * b.z;
            ata += row * row.transpose();
            atb += row * rhs;
        }
    }

    let f = ata.try_inverse()? * atb;
    let fx = (1.0 / f.x).abs().sqrt();
    let fy = (1.0 / f.y).abs().sqrt();
    (fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0).then_some((fx, fy))
}

impl MonocularCalibrator {
    pub fn new(criteria: TermCriteria) -> Self {
        Self {
            criteria,
            min_observations: MIN_OBSERVATIONS,
        }
    }

    /// Initial camera (zero distortion) and board poses.
    pub fn initialize(
        &self,
        observations: &[ChessboardObservation],
        image_size: ImageSize,
    ) -> Result<(PinholeCamera, Vec<Pose>), CalibrationError> {
        let homographies = observations
            .iter()
            .enumerate()
            .map(|(i, obs)| {
                let board: Vec<Point2<f64>> =
                    obs.object_points.iter().map(|p| Point2::new(p.x, p.y)).collect();
                estimate_homography(&board, &obs.image_points)
                    .map(|h| h.h)
                    .ok_or_else(|| {
                        CalibrationError::Computation(format!(
                            "degenerate homography for view {i} ({})",
                            obs.source
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cx = (image_size.width as f64 - 1.0) * 0.5;
        let cy = (image_size.height as f64 - 1.0) * 0.5;
        let (fx, fy) = init_focal(&homographies, cx, cy).ok_or_else(|| {
            CalibrationError::Computation("cannot initialize focal length".to_string())
        })?;
        let camera = PinholeCamera::new(fx, fy, cx, cy, Distortion::zero());
        debug!("initial focal lengths fx={fx:.2} fy={fy:.2}");

        let k_inv = camera
            .k_matrix()
            .try_inverse()
            .ok_or_else(|| CalibrationError::Computation("singular camera matrix".to_string()))?;
        let poses = homographies
            .iter()
            .map(|h| pose_from_homography(&k_inv, h))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                CalibrationError::Computation("cannot decompose homography".to_string())
            })?;
        Ok((camera, poses))
    }

    /// Fit intrinsics, distortion and per-view poses.
    ///
    /// Fails with [`CalibrationError::InsufficientObservations`] below
    /// [`Self::min_observations`] views.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, observations), fields(views = observations.len()))
    )]
    pub fn calibrate(
        &self,
        observations: &[ChessboardObservation],
        image_size: ImageSize,
    ) -> Result<MonoCalibration, CalibrationError> {
        if observations.len() < self.min_observations {
            return Err(CalibrationError::InsufficientObservations {
                found: observations.len(),
                required: self.min_observations,
            });
        }
        if let Some(obs) = observations.iter().find(|o| o.len() < 4) {
            return Err(CalibrationError::Computation(format!(
                "view {} has only {} corners",
                obs.source,
                obs.len()
            )));
        }

        let (camera, poses) = self.initialize(observations, image_size)?;

        let mut params = Vec::with_capacity(INTRINSIC_PARAMS + 6 * poses.len());
        params.extend_from_slice(&camera_params(&camera));
        for pose in &poses {
            params.extend_from_slice(&pose.to_array());
        }
        let mut params = DVector::from_vec(params);

        let model = MonoModel {
            views: observations,
        };
        let bundle = Bundle::new(&model);
        let report = LevenbergMarquardt::new(self.criteria).minimize(&bundle, &mut params)?;

        let camera = camera_from_params(&params.as_slice()[..INTRINSIC_PARAMS]);
        if !(camera.fx > 0.0 && camera.fy > 0.0 && camera.fx.is_finite() && camera.fy.is_finite()) {
            return Err(CalibrationError::Computation(format!(
                "fit diverged (fx={}, fy={})",
                camera.fx, camera.fy
            )));
        }

        let poses = params.as_slice()[INTRINSIC_PARAMS..]
            .chunks_exact(6)
            .map(Pose::from_slice)
            .collect();
        let per_view_rms = bundle
            .view_costs(&params)
            .iter()
            .zip(observations)
            .map(|(cost, obs)| (cost / obs.len() as f64).sqrt())
            .collect();
        let total_points: usize = observations.iter().map(|o| o.len()).sum();
        let rms = (report.final_cost / total_points as f64).sqrt();

        info!(
            "calibrated {} views: fx={:.2} fy={:.2} cx={:.2} cy={:.2} rms={:.4}px ({} iterations)",
            observations.len(),
            camera.fx,
            camera.fy,
            camera.cx,
            camera.cy,
            rms,
            report.iterations
        );

        Ok(MonoCalibration {
            intrinsics: CameraIntrinsics {
                camera,
                rms,
                image_size: Some(image_size),
            },
            poses,
            per_view_rms,
            report,
        })
    }
}
