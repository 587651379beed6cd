//! Exhaustive SAD block matching along image rows.

use crate::{DisparityEngine, DisparityError, DisparityMap};
use image::{GrayImage, ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use stereo_recon_core::ProgressSink;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

const STAGE: &str = "block matching";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockMatchParams {
    /// Side of the square block, also the width of the unprocessed border.
    pub block_size: u32,
    /// Candidates span `[col - search, col + search)`.
    pub search_block_size: u32,
}

impl Default for BlockMatchParams {
    fn default() -> Self {
        Self {
            block_size: 5,
            search_block_size: 56,
        }
    }
}

impl BlockMatchParams {
    pub fn validate(&self) -> Result<(), DisparityError> {
        if self.block_size == 0 {
            return Err(DisparityError::InvalidParameter(
                "block_size must be at least 1".to_string(),
            ));
        }
        if self.search_block_size == 0 {
            return Err(DisparityError::InvalidParameter(
                "search_block_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reference matcher: for each pixel, the block anchored at it (top-left) is
/// compared against every block on the same right-image row within the
/// search window, and the column with the smallest SAD wins.
///
/// Pixels closer than `block_size` to any edge keep disparity `0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMatchSad {
    pub params: BlockMatchParams,
}

struct Planes<'a> {
    left: &'a [u8],
    right: &'a [u8],
    width: usize,
    channels: usize,
}

impl Planes<'_> {
    /// SAD between the blocks at `(row, lcol)` left and `(row, rcol)` right.
    #[inline]
    fn sad(&self, row: usize, lcol: usize, rcol: usize, block: usize) -> u32 {
        let stride = self.width * self.channels;
        let span = block * self.channels;
        let mut acc = 0u32;
        for y in row..row + block {
            let l = &self.left[y * stride + lcol * self.channels..][..span];
            let r = &self.right[y * stride + rcol * self.channels..][..span];
            acc += l
                .iter()
                .zip(r)
                .map(|(&a, &b)| a.abs_diff(b) as u32)
                .sum::<u32>();
        }
        acc
    }
}

impl BlockMatchSad {
    pub fn new(params: BlockMatchParams) -> Self {
        Self { params }
    }

    /// Match any 8-bit pixel type; channels contribute to one SAD.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(w = left.width(), h = left.height()))
    )]
    pub fn match_images<P>(
        &self,
        left: &ImageBuffer<P, Vec<u8>>,
        right: &ImageBuffer<P, Vec<u8>>,
        progress: &dyn ProgressSink,
    ) -> Result<DisparityMap, DisparityError>
    where
        P: Pixel<Subpixel = u8>,
    {
        self.params.validate()?;
        DisparityError::check_dimensions(left.dimensions(), right.dimensions())?;

        let (w, h) = left.dimensions();
        let mut map = DisparityMap::new(w, h);
        let b = self.params.block_size as usize;
        let s = self.params.search_block_size as usize;
        let (width, height) = (w as usize, h as usize);
        if width <= 2 * b || height <= 2 * b {
            log::debug!("{w}x{h} image is inside the {b}px border band");
            return Ok(map);
        }

        let planes = Planes {
            left: left.as_raw(),
            right: right.as_raw(),
            width,
            channels: P::CHANNEL_COUNT as usize,
        };
        let rows = height - 2 * b;
        let done = AtomicUsize::new(0);
        progress.begin(STAGE, rows);

        let match_row = |(row, out): (usize, &mut [f32])| {
            if row < b || row >= height - b {
                return;
            }
            for col in b..width - b {
                let lo = col.saturating_sub(s);
                let hi = (col + s).min(width - b + 1);
                let mut best = (u32::MAX, col);
                for cand in lo..hi {
                    let cost = planes.sad(row, col, cand, b);
                    if cost < best.0 {
                        best = (cost, cand);
                    }
                }
                out[col] = best.1.abs_diff(col) as f32;
            }
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.advance(STAGE, n, rows);
        };

        #[cfg(feature = "rayon")]
        map.data.par_chunks_mut(width).enumerate().for_each(match_row);
        #[cfg(not(feature = "rayon"))]
        map.data.chunks_mut(width).enumerate().for_each(match_row);

        progress.finish(STAGE);
        Ok(map)
    }
}

impl DisparityEngine for BlockMatchSad {
    fn compute_with_progress(
        &self,
        left: &GrayImage,
        right: &GrayImage,
        progress: &dyn ProgressSink,
    ) -> Result<DisparityMap, DisparityError> {
        self.match_images(left, right, progress)
    }
}
