//! JSON persistence for calibration artifacts.
//!
//! An artifact is a flat map from key to matrix; each matrix keeps its shape
//! and row-major data. Floats are written in shortest round-trip form and
//! parsed exactly, so a save followed by a load reproduces every value.

use crate::error::StoreError;
use crate::mono::CameraIntrinsics;
use crate::rectify::RectificationTransform;
use crate::stereo::StereoExtrinsics;
use nalgebra::{Dim, Matrix, Matrix3, Matrix4, RawStorage, SMatrix, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use stereo_recon_core::{Distortion, ImageSize, PinholeCamera};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl StoredMatrix {
    pub fn from_matrix<R: Dim, C: Dim, S: RawStorage<f64, R, C>>(m: &Matrix<f64, R, C, S>) -> Self {
        let (rows, cols) = m.shape();
        let data = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| m[(r, c)]))
            .collect();
        Self { rows, cols, data }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            rows: 1,
            cols: 1,
            data: vec![value],
        }
    }

    fn to_matrix<const R: usize, const C: usize>(
        &self,
        key: &str,
    ) -> Result<SMatrix<f64, R, C>, StoreError> {
        if self.rows != R || self.cols != C {
            return Err(StoreError::Malformed {
                key: key.to_string(),
                reason: format!("expected {R}x{C}, found {}x{}", self.rows, self.cols),
            });
        }
        if self.data.len() != R * C {
            return Err(StoreError::Malformed {
                key: key.to_string(),
                reason: format!("{}x{} matrix with {} values", R, C, self.data.len()),
            });
        }
        Ok(SMatrix::from_row_slice(&self.data))
    }
}

/// Keyed matrices of one artifact file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationDocument {
    entries: BTreeMap<String, StoredMatrix>,
}

impl CalibrationDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_matrix<R: Dim, C: Dim, S: RawStorage<f64, R, C>>(
        &mut self,
        key: &str,
        m: &Matrix<f64, R, C, S>,
    ) {
        self.entries
            .insert(key.to_string(), StoredMatrix::from_matrix(m));
    }

    pub fn insert_scalar(&mut self, key: &str, value: f64) {
        self.entries
            .insert(key.to_string(), StoredMatrix::scalar(value));
    }

    pub fn get(&self, key: &str) -> Option<&StoredMatrix> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn matrix<const R: usize, const C: usize>(
        &self,
        key: &str,
    ) -> Result<SMatrix<f64, R, C>, StoreError> {
        self.entries
            .get(key)
            .ok_or_else(|| StoreError::MissingKey(key.to_string()))?
            .to_matrix(key)
    }

    pub fn scalar(&self, key: &str) -> Result<f64, StoreError> {
        Ok(self.matrix::<1, 1>(key)?[(0, 0)])
    }

    /// Load a document; a missing file is [`StoreError::Missing`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::Missing(path.to_path_buf()),
            _ => StoreError::Io(e),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write through a sibling temporary file renamed into place.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let tmp = temp_sibling(path);
        if let Err(e) = fs::write(&tmp, json).and_then(|_| fs::rename(&tmp, path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        log::debug!("wrote {} entries to {}", self.entries.len(), path.display());
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "calibration".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn distortion_row(d: &Distortion) -> nalgebra::SMatrix<f64, 1, 5> {
    nalgebra::SMatrix::<f64, 1, 5>::from_row_slice(&d.to_array())
}

fn camera_entries(
    doc: &CalibrationDocument,
    k: &str,
    d: &str,
) -> Result<PinholeCamera, StoreError> {
    let k_matrix: Matrix3<f64> = doc.matrix(k)?;
    let coeffs = doc.matrix::<1, 5>(d)?;
    let mut dist = [0.0; 5];
    dist.copy_from_slice(coeffs.as_slice());
    Ok(PinholeCamera::from_matrix(&k_matrix, Distortion::from_array(dist)))
}

/// `SIZE` is `[width, height]`; absent in older artifacts.
fn size_entry(doc: &CalibrationDocument) -> Result<Option<ImageSize>, StoreError> {
    if doc.get("SIZE").is_none() {
        return Ok(None);
    }
    let m = doc.matrix::<1, 2>("SIZE")?;
    let dim = |v: f64| {
        (v >= 1.0 && v <= u32::MAX as f64 && v.fract() == 0.0)
            .then_some(v as u32)
            .ok_or_else(|| StoreError::Malformed {
                key: "SIZE".to_string(),
                reason: format!("{v} is not an image dimension"),
            })
    };
    Ok(Some(ImageSize::new(dim(m[(0, 0)])?, dim(m[(0, 1)])?)))
}

/// Write a single-camera artifact: `K`, `D`, `RMS` and, when known, `SIZE`.
pub fn save_mono(path: impl AsRef<Path>, intrinsics: &CameraIntrinsics) -> Result<(), StoreError> {
    let mut doc = CalibrationDocument::new();
    doc.insert_matrix("K", &intrinsics.k_matrix());
    doc.insert_matrix("D", &distortion_row(&intrinsics.distortion()));
    doc.insert_scalar("RMS", intrinsics.rms);
    if let Some(size) = intrinsics.image_size {
        let row = nalgebra::SMatrix::<f64, 1, 2>::new(size.width as f64, size.height as f64);
        doc.insert_matrix("SIZE", &row);
    }
    doc.write(path)
}

pub fn load_mono(path: impl AsRef<Path>) -> Result<CameraIntrinsics, StoreError> {
    let doc = CalibrationDocument::read(path)?;
    Ok(CameraIntrinsics {
        camera: camera_entries(&doc, "K", "D")?,
        rms: doc.scalar("RMS")?,
        image_size: size_entry(&doc)?,
    })
}

/// Everything a reconstruction needs from a calibrated rig.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StereoArtifact {
    pub left: PinholeCamera,
    pub right: PinholeCamera,
    pub extrinsics: StereoExtrinsics,
    pub rectification: RectificationTransform,
}

/// Write a stereo artifact: `K1 D1 K2 D2 R T E F R1 R2 P1 P2 Q`.
pub fn save_stereo(path: impl AsRef<Path>, artifact: &StereoArtifact) -> Result<(), StoreError> {
    let ext = &artifact.extrinsics;
    let rect = &artifact.rectification;
    let mut doc = CalibrationDocument::new();
    doc.insert_matrix("K1", &artifact.left.k_matrix());
    doc.insert_matrix("D1", &distortion_row(&artifact.left.distortion));
    doc.insert_matrix("K2", &artifact.right.k_matrix());
    doc.insert_matrix("D2", &distortion_row(&artifact.right.distortion));
    doc.insert_matrix("R", &ext.r);
    doc.insert_matrix("T", &ext.t);
    doc.insert_matrix("E", &ext.e);
    doc.insert_matrix("F", &ext.f);
    doc.insert_matrix("R1", &rect.r1);
    doc.insert_matrix("R2", &rect.r2);
    doc.insert_matrix("P1", &rect.p1);
    doc.insert_matrix("P2", &rect.p2);
    doc.insert_matrix("Q", &rect.q);
    doc.write(path)
}

pub fn load_stereo(path: impl AsRef<Path>) -> Result<StereoArtifact, StoreError> {
    let doc = CalibrationDocument::read(path)?;
    let t: Vector3<f64> = doc.matrix("T")?;
    Ok(StereoArtifact {
        left: camera_entries(&doc, "K1", "D1")?,
        right: camera_entries(&doc, "K2", "D2")?,
        extrinsics: StereoExtrinsics {
            r: doc.matrix("R")?,
            t,
            e: doc.matrix("E")?,
            f: doc.matrix("F")?,
        },
        rectification: RectificationTransform {
            r1: doc.matrix("R1")?,
            r2: doc.matrix("R2")?,
            p1: doc.matrix("P1")?,
            p2: doc.matrix("P2")?,
            q: doc.matrix("Q")?,
        },
    })
}

/// Read only `Q` from any artifact that carries one.
pub fn load_q(path: impl AsRef<Path>) -> Result<Matrix4<f64>, StoreError> {
    CalibrationDocument::read(path)?.matrix("Q")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3x4;

    #[test]
    fn matrices_round_trip_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let p = Matrix3x4::new(
            0.1, 1.0 / 3.0, -2.5e-17, 7.0, //
            std::f64::consts::PI, 0.0, -0.0, 1e300, //
            1.0, 2.0, 3.0, 4.000000000000001,
        );
        let mut doc = CalibrationDocument::new();
        doc.insert_matrix("P", &p);
        doc.write(&path).unwrap();

        let back = CalibrationDocument::read(&path).unwrap();
        assert_eq!(p, back.matrix::<3, 4>("P").unwrap());
        assert_eq!(vec!["P"], back.keys().collect::<Vec<_>>());
        assert!(!dir.path().join("m.json.tmp").exists());
    }

    #[test]
    fn shape_mismatch_is_malformed() {
        let mut doc = CalibrationDocument::new();
        doc.insert_matrix("K", &Matrix3::<f64>::identity());
        let err = doc.matrix::<4, 4>("K").unwrap_err();
        assert!(matches!(err, StoreError::Malformed { ref key, .. } if key == "K"));
        assert!(matches!(doc.matrix::<3, 3>("Q"), Err(StoreError::MissingKey(_))));
    }

    #[test]
    fn truncated_data_is_malformed() {
        let doc: CalibrationDocument =
            serde_json::from_str(r#"{"K": {"rows": 3, "cols": 3, "data": [1.0, 0.0]}}"#).unwrap();
        assert!(matches!(doc.matrix::<3, 3>("K"), Err(StoreError::Malformed { .. })));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(load_q(&path), Err(StoreError::Missing(p)) if p == path));
    }

    #[test]
    fn fractional_size_is_malformed() {
        let mut doc = CalibrationDocument::new();
        doc.insert_matrix("SIZE", &nalgebra::SMatrix::<f64, 1, 2>::new(640.5, 480.0));
        assert!(matches!(
            size_entry(&doc),
            Err(StoreError::Malformed { ref key, .. }) if key == "SIZE"
        ));
        assert_eq!(None, size_entry(&CalibrationDocument::new()).unwrap());
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_mono(&path), Err(StoreError::Json(_))));
    }
}
