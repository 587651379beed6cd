//! Synthetic chessboard views for calibration tests.
#![allow(dead_code)]

use nalgebra::{Matrix3, Point2, Point3, Vector3};
use stereo_recon_chessboard::{CalibrationPattern, ChessboardObservation};
use stereo_recon_core::{rodrigues, Distortion, ImageSize, PinholeCamera, Pose};

pub const SIZE: ImageSize = ImageSize::new(640, 480);

pub fn pattern() -> CalibrationPattern {
    CalibrationPattern::new(9, 6, 0.025).unwrap()
}

pub fn left_camera() -> PinholeCamera {
    PinholeCamera::new(
        700.0,
        695.0,
        322.0,
        238.0,
        Distortion::from_array([-0.12, 0.05, 0.001, -0.0008, 0.0]),
    )
}

pub fn right_camera() -> PinholeCamera {
    PinholeCamera::new(
        705.0,
        702.0,
        315.0,
        245.0,
        Distortion::from_array([-0.1, 0.03, -0.0005, 0.0004, 0.0]),
    )
}

/// Right camera relative to the left: `X_right = R * X_left + T`.
pub fn rig() -> (Matrix3<f64>, Vector3<f64>) {
    (
        rodrigues(&Vector3::new(0.004, -0.03, 0.006)),
        Vector3::new(-0.1, 0.002, 0.001),
    )
}

/// Deterministic uniform noise in `[-amplitude, amplitude]`.
pub struct Noise {
    state: u64,
    amplitude: f64,
}

impl Noise {
    pub fn new(seed: u64, amplitude: f64) -> Self {
        Self {
            state: seed.max(1),
            amplitude,
        }
    }

    pub fn next(&mut self) -> f64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        let unit = (self.state >> 11) as f64 / (1u64 << 53) as f64;
        (2.0 * unit - 1.0) * self.amplitude
    }
}

/// Board pose for view `i`: tilted up to about 30 degrees, 0.5 to 0.7 m away,
/// roughly centred in the image.
pub fn board_pose(i: usize) -> Pose {
    let f = i as f64;
    let rvec = Vector3::new(
        0.5 * (1.3 * f).sin(),
        0.5 * (0.9 * f + 0.4).cos(),
        0.15 * (0.7 * f).sin(),
    );
    let r = rodrigues(&rvec);
    let centre = Vector3::new(0.1, 0.0625, 0.0);
    let target = Vector3::new(
        0.05 * (2.1 * f).sin(),
        0.03 * (1.7 * f).cos(),
        0.5 + 0.2 * (i % 5) as f64 / 4.0,
    );
    Pose::new(rvec, target - r * centre)
}

pub fn observe(
    camera: &PinholeCamera,
    to_camera: impl Fn(&Point3<f64>) -> Point3<f64>,
    name: String,
    noise: &mut Noise,
) -> ChessboardObservation {
    let object_points = pattern().object_points();
    let image_points = object_points
        .iter()
        .map(|p| {
            let q = camera.project(&to_camera(p));
            Point2::new(q.x + noise.next(), q.y + noise.next())
        })
        .collect();
    ChessboardObservation {
        source: name,
        image_points,
        object_points,
    }
}

pub fn mono_views(
    camera: &PinholeCamera,
    count: usize,
    noise: &mut Noise,
) -> Vec<ChessboardObservation> {
    (0..count)
        .map(|i| {
            let pose = board_pose(i);
            observe(camera, |p| pose.transform(p), format!("view{i:02}.png"), noise)
        })
        .collect()
}

pub fn stereo_views(
    count: usize,
    noise: &mut Noise,
) -> (Vec<ChessboardObservation>, Vec<ChessboardObservation>) {
    let (left, right) = (left_camera(), right_camera());
    let (r, t) = rig();
    (0..count)
        .map(|i| {
            let pose = board_pose(i);
            let l = observe(&left, |p| pose.transform(p), format!("left{i:02}.png"), noise);
            let rr = observe(
                &right,
                |p| Point3::from(r * pose.transform(p).coords + t),
                format!("right{i:02}.png"),
                noise,
            );
            (l, rr)
        })
        .unzip()
}
