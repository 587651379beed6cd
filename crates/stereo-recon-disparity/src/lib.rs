//! Dense disparity estimation for rectified stereo pairs.
//!
//! Two interchangeable strategies implement [`DisparityEngine`]:
//! [`SemiGlobalMatcher`] (the default) and the exhaustive [`BlockMatchSad`]
//! reference matcher. [`MatcherConfig`] selects one from a serialized
//! configuration.
//!
//! ```
//! use image::{GrayImage, Luma};
//! use stereo_recon_disparity::{DisparityEngine, MatcherConfig};
//!
//! let left = GrayImage::from_fn(64, 32, |x, y| Luma([((x * 7 + y * 3) % 200) as u8]));
//! let right = left.clone();
//! let engine = MatcherConfig::default().build();
//! let map = engine.compute(&left, &right).unwrap();
//! assert_eq!((64, 32), (map.width, map.height));
//! ```

mod block;
mod error;
mod map;
mod sgm;
mod speckle;

pub use block::{BlockMatchParams, BlockMatchSad};
pub use error::DisparityError;
pub use map::DisparityMap;
pub use sgm::{smoothness_penalties, SemiGlobalMatcher, SgmMode, SgmParams, MAX_DISPARITY};
pub use speckle::filter_speckles;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use stereo_recon_core::{NoProgress, ProgressSink};

/// Correspondence search between a rectified grayscale pair.
pub trait DisparityEngine: Send + Sync {
    fn compute_with_progress(
        &self,
        left: &GrayImage,
        right: &GrayImage,
        progress: &dyn ProgressSink,
    ) -> Result<DisparityMap, DisparityError>;

    fn compute(&self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap, DisparityError> {
        self.compute_with_progress(left, right, &NoProgress)
    }
}

/// Serializable matcher selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherConfig {
    Sgm(SgmParams),
    BlockMatch(BlockMatchParams),
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self::Sgm(SgmParams::default())
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), DisparityError> {
        match self {
            Self::Sgm(p) => p.validate(),
            Self::BlockMatch(p) => p.validate(),
        }
    }

    pub fn build(&self) -> Box<dyn DisparityEngine> {
        match *self {
            Self::Sgm(params) => Box::new(SemiGlobalMatcher::new(params)),
            Self::BlockMatch(params) => Box::new(BlockMatchSad::new(params)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sgm(_) => "sgm",
            Self::BlockMatch(_) => "block_match",
        }
    }
}
