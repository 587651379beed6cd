use stereo_recon_calib::{load_mono, save_mono, CalibrationDocument, CameraIntrinsics, StoreError};
use stereo_recon_core::{Distortion, ImageSize, PinholeCamera};

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics {
        camera: PinholeCamera::new(
            701.123456789,
            699.987654321,
            319.5,
            239.25,
            Distortion::from_array([-0.123, 0.0456, 1e-4, -2e-5, 0.001]),
        ),
        rms: 0.31415926535,
        image_size: Some(ImageSize::new(1280, 720)),
    }
}

#[test]
fn mono_artifact_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("left.json");
    save_mono(&path, &intrinsics()).unwrap();
    assert_eq!(intrinsics(), load_mono(&path).unwrap());

    let doc = CalibrationDocument::read(&path).unwrap();
    assert_eq!(vec!["D", "K", "RMS", "SIZE"], doc.keys().collect::<Vec<_>>());
    let d = doc.get("D").unwrap();
    assert_eq!((1, 5), (d.rows, d.cols));
    assert_eq!(vec![1280.0, 720.0], doc.get("SIZE").unwrap().data);
}

#[test]
fn artifact_without_size_still_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.json");
    let legacy = CameraIntrinsics {
        image_size: None,
        ..intrinsics()
    };
    save_mono(&path, &legacy).unwrap();

    let doc = CalibrationDocument::read(&path).unwrap();
    assert_eq!(vec!["D", "K", "RMS"], doc.keys().collect::<Vec<_>>());
    assert_eq!(legacy, load_mono(&path).unwrap());
}

#[test]
fn missing_key_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.json");
    let mut doc = CalibrationDocument::new();
    doc.insert_matrix("K", &intrinsics().k_matrix());
    doc.write(&path).unwrap();

    match load_mono(&path) {
        Err(StoreError::MissingKey(key)) => assert_eq!("D", key),
        other => panic!("expected a missing key, got {other:?}"),
    }
}

#[test]
fn save_replaces_existing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cam.json");
    std::fs::write(&path, "stale").unwrap();
    save_mono(&path, &intrinsics()).unwrap();
    assert_eq!(intrinsics(), load_mono(&path).unwrap());
}
