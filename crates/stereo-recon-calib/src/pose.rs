use crate::bundle::{Bundle, ViewModel};
use crate::error::CalibrationError;
use nalgebra::{DVector, Matrix3, Point2, Point3};
use stereo_recon_core::{estimate_homography, LevenbergMarquardt, PinholeCamera, Pose, TermCriteria};

/// Board pose from a board-plane-to-image homography.
///
/// `k_inv` maps pixels to normalized coordinates. The rotation is projected
/// onto SO(3) and the board is placed in front of the camera.
pub(crate) fn pose_from_homography(k_inv: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<Pose> {
    let m = k_inv * h;
    let n1 = m.column(0).norm();
    let n2 = m.column(1).norm();
    if n1 < 1e-12 || n2 < 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / (n1 + n2);
    if (m[(2, 2)] * lambda) < 0.0 {
        lambda = -lambda;
    }

    let r1 = m.column(0) * lambda;
    let r2 = m.column(1) * lambda;
    let t = m.column(2) * lambda;
    let r3 = r1.cross(&r2);
    let approx = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = approx.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }
    Some(Pose::from_rt(&r, t))
}

struct PoseModel<'a> {
    camera: &'a PinholeCamera,
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
}

impl ViewModel for PoseModel<'_> {
    fn num_global(&self) -> usize {
        6
    }

    fn num_local(&self) -> usize {
        0
    }

    fn num_views(&self) -> usize {
        1
    }

    fn view_rows(&self, _view: usize) -> usize {
        2 * self.object.len()
    }

    fn view_residuals(&self, global: &[f64], _local: &[f64], _view: usize, out: &mut [f64]) {
        let pose = Pose::from_slice(global);
        let r = pose.rotation();
        for (k, (obj, img)) in self.object.iter().zip(self.image).enumerate() {
            let proj = self.camera.project(&Point3::from(r * obj.coords + pose.tvec));
            out[2 * k] = proj.x - img.x;
            out[2 * k + 1] = proj.y - img.y;
        }
    }
}

/// Pose of a planar (`z = 0`) target seen by a calibrated camera.
pub fn solve_planar_pose(
    camera: &PinholeCamera,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    criteria: &TermCriteria,
) -> Result<Pose, CalibrationError> {
    if object.len() != image.len() || object.len() < 4 {
        return Err(CalibrationError::Computation(format!(
            "pose needs >= 4 matched points (got {} object, {} image)",
            object.len(),
            image.len()
        )));
    }

    let board: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
    let normalized: Vec<Point2<f64>> = image
        .iter()
        .map(|p| camera.undistort_normalized(p, criteria))
        .collect();
    let h = estimate_homography(&board, &normalized)
        .ok_or_else(|| CalibrationError::Computation("degenerate pose homography".to_string()))?;
    let initial = pose_from_homography(&Matrix3::identity(), &h.h).ok_or_else(|| {
        CalibrationError::Computation("cannot decompose pose homography".to_string())
    })?;

    let model = PoseModel {
        camera,
        object,
        image,
    };
    let bundle = Bundle::new(&model);
    let mut params = DVector::from_row_slice(&initial.to_array());
    LevenbergMarquardt::new(*criteria).minimize(&bundle, &mut params)?;
    Ok(Pose::from_slice(params.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use stereo_recon_core::Distortion;

    #[test]
    fn recovers_pose_of_tilted_board() {
        let camera = PinholeCamera::new(
            800.0,
            790.0,
            330.0,
            235.0,
            Distortion::from_array([-0.08, 0.02, 0.0, 0.0, 0.0]),
        );
        let truth = Pose::new(Vector3::new(0.3, -0.25, 0.1), Vector3::new(-0.08, -0.05, 0.6));
        let object: Vec<Point3<f64>> = (0..6)
            .flat_map(|j| (0..9).map(move |i| Point3::new(i as f64 * 0.02, j as f64 * 0.02, 0.0)))
            .collect();
        let image: Vec<Point2<f64>> = object
            .iter()
            .map(|p| camera.project(&truth.transform(p)))
            .collect();

        let criteria = TermCriteria::new(50, 1e-10);
        let pose = solve_planar_pose(&camera, &object, &image, &criteria).unwrap();
        assert_relative_eq!(pose.rvec, truth.rvec, epsilon = 1e-6);
        assert_relative_eq!(pose.tvec, truth.tvec, epsilon = 1e-7);
    }

    #[test]
    fn homography_decomposition_keeps_board_in_front() {
        let truth = Pose::new(Vector3::new(0.1, 0.2, 0.0), Vector3::new(0.0, 0.0, 2.0));
        let r = truth.rotation();
        // H = [r1 r2 t] up to a negative scale
        let h = Matrix3::from_columns(&[
            r.column(0).into_owned(),
            r.column(1).into_owned(),
            truth.tvec,
        ]) * -3.0;
        let pose = pose_from_homography(&Matrix3::identity(), &h).unwrap();
        assert!(pose.tvec.z > 0.0);
        assert_relative_eq!(pose.rvec, truth.rvec, epsilon = 1e-9);
    }
}
