//! Run configuration shared by the pipelines and the CLI.

use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use stereo_recon_calib::RectifyOptions;
use stereo_recon_chessboard::{CalibrationPattern, ChessboardParams};
use stereo_recon_core::TermCriteria;
use stereo_recon_disparity::MatcherConfig;

/// Every tunable of a calibration or reconstruction run.
///
/// Missing JSON fields fall back to their defaults, so a config file only
/// needs the values it changes:
///
/// ```
/// use stereo_recon::ReconstructionConfig;
///
/// let cfg: ReconstructionConfig =
///     serde_json::from_str(r#"{ "matcher": { "kind": "block_match" } }"#).unwrap();
/// assert_eq!("block_match", cfg.matcher.name());
/// assert_eq!(9, cfg.pattern.cols);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub pattern: CalibrationPattern,
    pub detector: ChessboardParams,
    /// The one stop condition for corner refinement, every calibration
    /// solve and point undistortion during rectification.
    pub criteria: TermCriteria,
    pub rectify: RectifyOptions,
    pub matcher: MatcherConfig,
}

impl ReconstructionConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.pattern.validate()?;
        self.matcher.validate()?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|source| PipelineError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| PipelineError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json)?;
        Ok(())
    }
}
