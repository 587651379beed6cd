mod common;

use common::{left_camera, right_camera, rig, stereo_views, Noise, SIZE};
use stereo_recon_calib::{
    load_stereo, save_stereo, CalibrationError, RectifyOptions, StereoArtifact, StereoCalibrator,
};
use stereo_recon_core::rotation_angle;

#[test]
fn recovers_rig_from_twenty_noisy_pairs() {
    let mut noise = Noise::new(2024, 0.1);
    let (left, right) = stereo_views(20, &mut noise);
    let calib = StereoCalibrator::default()
        .calibrate(&left, &right, &left_camera(), &right_camera(), SIZE)
        .unwrap();

    let (r, t) = rig();
    let ext = calib.extrinsics;
    let angle_err = rotation_angle(&(ext.r * r.transpose()));
    assert!(angle_err.to_degrees() < 0.1, "rotation error {angle_err}");
    assert!((ext.t - t).norm() < 1e-3, "T = {:?}", ext.t);
    assert!(calib.rms < 1.0, "rms {}", calib.rms);
    assert_eq!(20, calib.left_poses.len());
    assert!((ext.f[(2, 2)] - 1.0).abs() < 1e-12);
}

#[test]
fn fourteen_pairs_are_not_enough() {
    let mut noise = Noise::new(5, 0.1);
    let (left, right) = stereo_views(14, &mut noise);
    let err = StereoCalibrator::default()
        .calibrate(&left, &right, &left_camera(), &right_camera(), SIZE)
        .unwrap_err();
    assert!(matches!(err, CalibrationError::InsufficientObservations { found: 14, .. }));
}

#[test]
fn mismatched_corner_counts_are_rejected() {
    let mut noise = Noise::new(5, 0.1);
    let (left, mut right) = stereo_views(15, &mut noise);
    right[4].image_points.pop();
    right[4].object_points.pop();
    let err = StereoCalibrator::default()
        .calibrate(&left, &right, &left_camera(), &right_camera(), SIZE)
        .unwrap_err();
    assert!(matches!(
        err,
        CalibrationError::CornerCountMismatch {
            index: 4,
            left: 54,
            right: 53
        }
    ));
}

#[test]
fn calibrated_rig_round_trips_through_store() {
    let mut noise = Noise::new(99, 0.05);
    let (left, right) = stereo_views(16, &mut noise);
    let calibrator = StereoCalibrator::default();
    let (lc, rc) = (left_camera(), right_camera());
    let calib = calibrator.calibrate(&left, &right, &lc, &rc, SIZE).unwrap();
    let rect = calibrator
        .rectify(&lc, &rc, SIZE, &calib.extrinsics, &RectifyOptions::default())
        .unwrap();

    let artifact = StereoArtifact {
        left: lc,
        right: rc,
        extrinsics: calib.extrinsics,
        rectification: rect.transform,
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo.json");
    save_stereo(&path, &artifact).unwrap();
    assert_eq!(artifact, load_stereo(&path).unwrap());
    assert_eq!(rect.transform.q, stereo_recon_calib::load_q(&path).unwrap());
}
