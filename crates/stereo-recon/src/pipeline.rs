//! File-system pipelines: image folders in, artifacts and point clouds out.

use crate::{PipelineError, ReconstructionConfig};
use image::RgbImage;
use log::{debug, info, warn};
use nalgebra::Matrix4;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use stereo_recon_calib::{
    init_rectify_map, load_q, load_stereo, remap, CalibrationError, CameraIntrinsics,
    MonoCalibration, MonocularCalibrator, Rectification, StereoArtifact, StereoCalibration,
    StereoCalibrator,
};
use stereo_recon_chessboard::{draw_corners, ChessboardDetector, ChessboardObservation};
use stereo_recon_cloud::{reconstruct, write_ply, PointCloud};
use stereo_recon_core::{luma_bt601, ImageSize, ProgressSink};
use stereo_recon_disparity::{DisparityEngine, DisparityMap};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Extensions accepted by [`list_images`], compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm"];

const DETECTION: &str = "chessboard detection";

/// Image files directly inside `dir`, sorted by file name.
///
/// Stereo folders are paired by position in this listing.
pub fn list_images(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, PipelineError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if is_image && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Which images yielded a complete pattern.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DetectionReport {
    pub detected: Vec<String>,
    pub missing: Vec<String>,
}

impl DetectionReport {
    pub fn total(&self) -> usize {
        self.detected.len() + self.missing.len()
    }
}

/// Per-image detection results of one folder, in input order.
#[derive(Clone, Debug)]
pub struct DetectedImages {
    pub observations: Vec<Option<ChessboardObservation>>,
    /// Shared size of every image; `None` for an empty input.
    pub image_size: Option<ImageSize>,
    pub report: DetectionReport,
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_rgb(path: &Path) -> Result<RgbImage, PipelineError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| PipelineError::image(path, e))
}

fn image_size(img: &RgbImage) -> ImageSize {
    ImageSize::new(img.width(), img.height())
}

/// Detector whose corner refinement stops on `config.criteria`.
fn chessboard_detector(config: &ReconstructionConfig) -> ChessboardDetector {
    ChessboardDetector::new(config.detector.clone()).with_criteria(config.criteria)
}

/// Detect the configured pattern in every image.
///
/// A missing pattern is tallied in the report; unreadable images and images
/// whose size differs from the first one abort the run. With `debug_dir`,
/// every detection is also written there with its corners drawn.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(images = paths.len()))
)]
pub fn detect_images(
    paths: &[PathBuf],
    config: &ReconstructionConfig,
    debug_dir: Option<&Path>,
    progress: &dyn ProgressSink,
) -> Result<DetectedImages, PipelineError> {
    config.pattern.validate()?;
    if let Some(dir) = debug_dir {
        fs::create_dir_all(dir)?;
    }

    let detector = chessboard_detector(config);
    let mut out = DetectedImages {
        observations: Vec::with_capacity(paths.len()),
        image_size: None,
        report: DetectionReport::default(),
    };

    progress.begin(DETECTION, paths.len());
    for (i, path) in paths.iter().enumerate() {
        let label = file_label(path);
        let mut rgb = load_rgb(path)?;
        let size = image_size(&rgb);
        match out.image_size {
            None => out.image_size = Some(size),
            Some(expected) if expected != size => {
                return Err(PipelineError::ImageDimensionMismatch {
                    what: label,
                    expected,
                    found: size,
                });
            }
            Some(_) => {}
        }

        let gray = luma_bt601(&rgb);
        let observation = match detector.detect(&gray, &config.pattern) {
            Some(corners) => {
                debug!("pattern found in {label}");
                if let Some(dir) = debug_dir {
                    draw_corners(&mut rgb, &corners);
                    let target = dir.join(&label);
                    rgb.save(&target)
                        .map_err(|e| PipelineError::image(target, e))?;
                }
                out.report.detected.push(label.clone());
                Some(ChessboardObservation::new(label, corners, &config.pattern)?)
            }
            None => {
                debug!("pattern not found in {label}");
                out.report.missing.push(label);
                None
            }
        };
        out.observations.push(observation);
        progress.advance(DETECTION, i + 1, paths.len());
    }
    progress.finish(DETECTION);

    info!(
        "pattern found in {} of {} images",
        out.report.detected.len(),
        out.report.total()
    );
    Ok(out)
}

/// Result of a single-camera folder calibration.
#[derive(Clone, Debug)]
pub struct CameraCalibrationOutput {
    pub calibration: MonoCalibration,
    pub image_size: ImageSize,
    pub report: DetectionReport,
}

pub fn calibrate_camera_paths(
    paths: &[PathBuf],
    config: &ReconstructionConfig,
    debug_dir: Option<&Path>,
    progress: &dyn ProgressSink,
) -> Result<CameraCalibrationOutput, PipelineError> {
    let detected = detect_images(paths, config, debug_dir, progress)?;
    let calibrator = MonocularCalibrator::new(config.criteria);
    let observations: Vec<ChessboardObservation> =
        detected.observations.into_iter().flatten().collect();
    let Some(image_size) = detected.image_size else {
        return Err(CalibrationError::InsufficientObservations {
            found: 0,
            required: calibrator.min_observations,
        }
        .into());
    };

    let calibration = calibrator.calibrate(&observations, image_size)?;
    info!(
        "camera calibrated from {} views, rms {:.4} px",
        observations.len(),
        calibration.intrinsics.rms
    );
    Ok(CameraCalibrationOutput {
        calibration,
        image_size,
        report: detected.report,
    })
}

/// Calibrate one camera from every image in `dir`.
pub fn calibrate_camera_dir(
    dir: impl AsRef<Path>,
    config: &ReconstructionConfig,
    debug_dir: Option<&Path>,
    progress: &dyn ProgressSink,
) -> Result<CameraCalibrationOutput, PipelineError> {
    let paths = list_images(dir)?;
    calibrate_camera_paths(&paths, config, debug_dir, progress)
}

/// Result of a stereo calibration: the persistable artifact plus diagnostics.
#[derive(Clone, Debug)]
pub struct StereoCalibrationOutput {
    pub artifact: StereoArtifact,
    pub calibration: StereoCalibration,
    pub rectification: Rectification,
    pub image_size: ImageSize,
    /// Image pairs with the pattern found in both views.
    pub pairs: usize,
    pub left_report: DetectionReport,
    pub right_report: DetectionReport,
}

/// Calibrate the rig from paired image lists, keeping both intrinsics fixed.
///
/// Images are paired by position. The counts are compared before any image
/// is opened. Camera artifacts that record their calibration image size must
/// match the stereo images.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(left = left_paths.len(), right = right_paths.len()))
)]
pub fn calibrate_stereo_paths(
    left_paths: &[PathBuf],
    right_paths: &[PathBuf],
    left_camera: &CameraIntrinsics,
    right_camera: &CameraIntrinsics,
    config: &ReconstructionConfig,
    progress: &dyn ProgressSink,
) -> Result<StereoCalibrationOutput, PipelineError> {
    if left_paths.len() != right_paths.len() {
        return Err(PipelineError::ImageCountMismatch {
            left: left_paths.len(),
            right: right_paths.len(),
        });
    }

    let left = detect_images(left_paths, config, None, progress)?;
    let right = detect_images(right_paths, config, None, progress)?;
    let calibrator = StereoCalibrator::new(config.criteria);

    let image_size = match (left.image_size, right.image_size) {
        (Some(l), Some(r)) if l != r => {
            return Err(PipelineError::ImageDimensionMismatch {
                what: "right image set".to_string(),
                expected: l,
                found: r,
            });
        }
        (Some(l), Some(_)) => l,
        _ => {
            return Err(CalibrationError::InsufficientObservations {
                found: 0,
                required: calibrator.min_observations,
            }
            .into());
        }
    };

    for (what, intrinsics) in [("left camera", left_camera), ("right camera", right_camera)] {
        match intrinsics.image_size {
            Some(expected) if expected != image_size => {
                return Err(PipelineError::ImageDimensionMismatch {
                    what: format!("stereo images for the {what}"),
                    expected,
                    found: image_size,
                });
            }
            Some(_) => {}
            None => warn!("{what} artifact has no image size; assuming {image_size}"),
        }
    }
    let (left_camera, right_camera) = (&left_camera.camera, &right_camera.camera);

    let (left_obs, right_obs): (Vec<_>, Vec<_>) = left
        .observations
        .into_iter()
        .zip(right.observations)
        .filter_map(|pair| match pair {
            (Some(l), Some(r)) => Some((l, r)),
            _ => None,
        })
        .unzip();
    let pairs = left_obs.len();
    info!("pattern found in both views of {pairs} pairs");

    let calibration = calibrator.calibrate(
        &left_obs,
        &right_obs,
        left_camera,
        right_camera,
        image_size,
    )?;
    let rectification = calibrator.rectify(
        left_camera,
        right_camera,
        image_size,
        &calibration.extrinsics,
        &config.rectify,
    )?;
    info!(
        "stereo rms {:.4} px, baseline {:.4}",
        calibration.rms,
        calibration.extrinsics.baseline()
    );

    Ok(StereoCalibrationOutput {
        artifact: StereoArtifact {
            left: *left_camera,
            right: *right_camera,
            extrinsics: calibration.extrinsics,
            rectification: rectification.transform,
        },
        calibration,
        rectification,
        image_size,
        pairs,
        left_report: left.report,
        right_report: right.report,
    })
}

pub fn calibrate_stereo_dirs(
    left_dir: impl AsRef<Path>,
    right_dir: impl AsRef<Path>,
    left_camera: &CameraIntrinsics,
    right_camera: &CameraIntrinsics,
    config: &ReconstructionConfig,
    progress: &dyn ProgressSink,
) -> Result<StereoCalibrationOutput, PipelineError> {
    let left = list_images(left_dir)?;
    let right = list_images(right_dir)?;
    calibrate_stereo_paths(&left, &right, left_camera, right_camera, config, progress)
}

/// Disparity and colored cloud of one image pair.
#[derive(Clone, Debug)]
pub struct Reconstruction {
    pub disparity: DisparityMap,
    pub cloud: PointCloud,
}

/// Undistort and rectify both images with the artifact's transforms.
pub fn rectify_pair(
    left: &RgbImage,
    right: &RgbImage,
    artifact: &StereoArtifact,
) -> Result<(RgbImage, RgbImage), PipelineError> {
    let size = image_size(left);
    let rect = &artifact.rectification;
    let left_map = init_rectify_map(&artifact.left, &rect.r1, &rect.p1, size)?;
    let right_map = init_rectify_map(&artifact.right, &rect.r2, &rect.p2, size)?;
    Ok((remap(left, &left_map), remap(right, &right_map)))
}

/// Match a rectified pair and lift the result into a cloud colored by the
/// left image.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(w = left.width(), h = left.height()))
)]
pub fn reconstruct_pair(
    left: &RgbImage,
    right: &RgbImage,
    q: &Matrix4<f64>,
    engine: &dyn DisparityEngine,
    progress: &dyn ProgressSink,
) -> Result<Reconstruction, PipelineError> {
    let (expected, found) = (image_size(left), image_size(right));
    if expected != found {
        return Err(PipelineError::ImageDimensionMismatch {
            what: "right image".to_string(),
            expected,
            found,
        });
    }

    let disparity = engine.compute_with_progress(&luma_bt601(left), &luma_bt601(right), progress)?;
    let cloud = reconstruct(&disparity, q, left)?;
    if cloud.is_empty() {
        warn!("no pixel passed the validity mask");
    }
    Ok(Reconstruction { disparity, cloud })
}

/// Inputs of [`reconstruct_files`].
#[derive(Clone, Debug, Default)]
pub struct ReconstructRequest {
    pub left_image: PathBuf,
    pub right_image: PathBuf,
    /// Stereo artifact; supplies `Q` and the rectification transforms.
    pub calibration: Option<PathBuf>,
    /// Artifact whose `Q` overrides the stereo artifact's.
    pub q_file: Option<PathBuf>,
    pub rectify: bool,
    pub ply_out: PathBuf,
    /// Optional 8-bit rendering of the disparity map.
    pub disparity_out: Option<PathBuf>,
}

/// Load a pair, reconstruct it and write the PLY (and disparity image).
pub fn reconstruct_files(
    request: &ReconstructRequest,
    config: &ReconstructionConfig,
    progress: &dyn ProgressSink,
) -> Result<Reconstruction, PipelineError> {
    config.matcher.validate()?;
    let artifact = request.calibration.as_deref().map(load_stereo).transpose()?;
    let q = match (&request.q_file, &artifact) {
        (Some(path), _) => {
            info!("using Q from {}", path.display());
            load_q(path)?
        }
        (None, Some(artifact)) => artifact.rectification.q,
        (None, None) => return Err(PipelineError::MissingQ),
    };

    let mut left = load_rgb(&request.left_image)?;
    let mut right = load_rgb(&request.right_image)?;
    if request.rectify {
        let artifact = artifact
            .as_ref()
            .ok_or(PipelineError::MissingStereoCalibration)?;
        (left, right) = rectify_pair(&left, &right, artifact)?;
        debug!("pair rectified");
    }

    let engine = config.matcher.build();
    info!("matching with {}", config.matcher.name());
    let result = reconstruct_pair(&left, &right, &q, engine.as_ref(), progress)?;

    write_ply(&request.ply_out, &result.cloud)?;
    if let Some(path) = &request.disparity_out {
        result
            .disparity
            .to_image()
            .save(path)
            .map_err(|e| PipelineError::image(path, e))?;
        info!("disparity image written to {}", path.display());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use stereo_recon_core::{NoProgress, PinholeCamera, TermCriteria};

    fn intrinsics(image_size: Option<ImageSize>) -> CameraIntrinsics {
        CameraIntrinsics {
            camera: PinholeCamera::new(500.0, 500.0, 320.0, 240.0, Default::default()),
            rms: 0.2,
            image_size,
        }
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn listing_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["right10.png", "right02.PNG", "notes.txt", "right01.jpg"] {
            touch(dir.path(), name);
        }
        fs::create_dir(dir.path().join("sub.png")).unwrap();

        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| file_label(p))
            .collect();
        assert_eq!(vec!["right01.jpg", "right02.PNG", "right10.png"], names);
    }

    #[test]
    fn count_mismatch_is_reported_before_detection() {
        // the paths do not exist: any detection attempt would fail with an I/O error
        let paths = |side: &str, n: usize| -> Vec<PathBuf> {
            (0..n)
                .map(|i| PathBuf::from(format!("/nonexistent/{side}{i:02}.png")))
                .collect()
        };
        let (left, right) = (paths("left", 20), paths("right", 18));
        let cam = intrinsics(None);
        let err = calibrate_stereo_paths(
            &left,
            &right,
            &cam,
            &cam,
            &ReconstructionConfig::default(),
            &NoProgress,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ImageCountMismatch { left: 20, right: 18 }
        ));
    }

    #[test]
    fn blank_images_are_tallied_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            RgbImage::from_pixel(64, 48, Rgb([120, 120, 120]))
                .save(dir.path().join(format!("view{i}.png")))
                .unwrap();
        }
        let paths = list_images(dir.path()).unwrap();
        let detected =
            detect_images(&paths, &ReconstructionConfig::default(), None, &NoProgress).unwrap();
        assert_eq!(Some(ImageSize::new(64, 48)), detected.image_size);
        assert_eq!(3, detected.report.missing.len());
        assert!(detected.observations.iter().all(Option::is_none));

        let config = ReconstructionConfig::default();
        let err = calibrate_camera_paths(&paths, &config, None, &NoProgress).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Calibration(CalibrationError::InsufficientObservations { found: 0, .. })
        ));
    }

    #[test]
    fn mixed_image_sizes_abort_detection() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(64, 48).save(dir.path().join("a.png")).unwrap();
        RgbImage::new(48, 64).save(dir.path().join("b.png")).unwrap();
        let paths = list_images(dir.path()).unwrap();
        let err = detect_images(&paths, &ReconstructionConfig::default(), None, &NoProgress)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageDimensionMismatch { .. }));
        assert!(err.to_string().contains("b.png"));
    }

    #[test]
    fn camera_artifact_size_must_match_stereo_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for side in ["left", "right"] {
            let path = dir.path().join(format!("{side}.png"));
            RgbImage::from_pixel(64, 48, Rgb([90, 90, 90]))
                .save(&path)
                .unwrap();
            paths.push(vec![path]);
        }
        let fits = intrinsics(Some(ImageSize::new(64, 48)));
        let other = intrinsics(Some(ImageSize::new(640, 480)));

        let err = calibrate_stereo_paths(
            &paths[0],
            &paths[1],
            &fits,
            &other,
            &ReconstructionConfig::default(),
            &NoProgress,
        )
        .unwrap_err();
        match err {
            PipelineError::ImageDimensionMismatch {
                what,
                expected,
                found,
            } => {
                assert!(what.contains("right camera"), "{what}");
                assert_eq!(ImageSize::new(640, 480), expected);
                assert_eq!(ImageSize::new(64, 48), found);
            }
            other => panic!("expected a size mismatch, got {other:?}"),
        }

        // matching sizes get as far as the pair count
        let err = calibrate_stereo_paths(
            &paths[0],
            &paths[1],
            &fits,
            &fits,
            &ReconstructionConfig::default(),
            &NoProgress,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Calibration(CalibrationError::InsufficientObservations { found: 0, .. })
        ));
    }

    #[test]
    fn configured_criteria_reach_corner_refinement() {
        let config: ReconstructionConfig =
            serde_json::from_str(r#"{ "criteria": { "max_iters": 5, "epsilon": 0.1 } }"#)
                .unwrap();
        let criteria = TermCriteria::new(5, 0.1);
        assert_eq!(criteria, config.criteria);
        assert_eq!(criteria, chessboard_detector(&config).criteria);
    }

    #[test]
    fn reconstruction_needs_a_q_source() {
        let request = ReconstructRequest {
            left_image: "l.png".into(),
            right_image: "r.png".into(),
            ply_out: "out.ply".into(),
            ..ReconstructRequest::default()
        };
        let err = reconstruct_files(&request, &ReconstructionConfig::default(), &NoProgress)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingQ));
    }
}
