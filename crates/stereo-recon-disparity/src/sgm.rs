//! Semi-global matching.
//!
//! The pipeline mirrors the classic SGBM layout:
//!
//! 1. both images are pre-filtered with a horizontal Sobel response clipped
//!    to `±pre_filter_cap`;
//! 2. the per-pixel cost is the absolute difference of the filtered values
//!    plus a quarter of the raw intensity difference, summed over a
//!    `block_size` square;
//! 3. costs are aggregated along 3, 5 or 8 one-dimensional paths with the
//!    `P1`/`P2` smoothness penalties;
//! 4. winner-take-all with a uniqueness test and a parabolic sub-pixel fit;
//! 5. left-right consistency check and speckle removal.
//!
//! Disparities are only searched for columns where every candidate lies in
//! the right image; other columns and rejected pixels get
//! `min_disparity - 1`.

use crate::speckle::filter_speckles;
use crate::{DisparityEngine, DisparityError, DisparityMap};
use image::GrayImage;
use log::debug;
use serde::{Deserialize, Serialize};
use stereo_recon_core::ProgressSink;

#[cfg(feature = "tracing")]
use tracing::instrument;

const STAGE: &str = "semi-global matching";

/// Aggregation path set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SgmMode {
    /// Left-to-right, right-to-left, top-down and the two top diagonals.
    Sgbm,
    /// All eight directions.
    Full,
    /// Both horizontal directions and top-down.
    #[default]
    ThreeWay,
}

impl SgmMode {
    pub fn directions(&self) -> &'static [(i32, i32)] {
        match self {
            Self::Sgbm => &[(1, 0), (-1, 0), (0, 1), (1, 1), (-1, 1)],
            Self::Full => &[
                (1, 0),
                (-1, 0),
                (0, 1),
                (0, -1),
                (1, 1),
                (-1, 1),
                (1, -1),
                (-1, -1),
            ],
            Self::ThreeWay => &[(1, 0), (-1, 0), (0, 1)],
        }
    }
}

/// `(P1, P2)` for `channels` input channels and a `block_size` window.
pub fn smoothness_penalties(channels: u32, block_size: u32) -> (u32, u32) {
    let area = block_size * block_size;
    (8 * channels * area, 32 * channels * area)
}

/// Channel count used for the default penalties.
const PENALTY_CHANNELS: u32 = 2;

/// Bound on `|disparity|` and on the smoothness penalties; keeps the
/// disparity arithmetic and the summed path costs inside their integer types.
pub const MAX_DISPARITY: i32 = 1 << 20;
const MAX_PENALTY: u32 = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgmParams {
    pub min_disparity: i32,
    /// Size of the search range; a positive multiple of 16.
    pub num_disparities: u32,
    /// Odd matching window side in `1..=11`.
    pub block_size: u32,
    /// Penalty for a disparity change of one; derived from `block_size`
    /// when unset.
    pub p1: Option<u32>,
    /// Penalty for larger changes; derived from `block_size` when unset.
    pub p2: Option<u32>,
    /// Maximum left-right disagreement in whole pixels; negative disables
    /// the check.
    pub disp12_max_diff: i32,
    /// Margin in percent by which the best cost must beat the runner-up.
    pub uniqueness_ratio: u32,
    /// Largest connected region treated as a speckle; `0` disables.
    pub speckle_window_size: u32,
    /// Maximum disparity step inside one connected region.
    pub speckle_range: u32,
    pub pre_filter_cap: u32,
    pub mode: SgmMode,
}

impl Default for SgmParams {
    fn default() -> Self {
        Self {
            min_disparity: -1,
            num_disparities: 80,
            block_size: 3,
            p1: None,
            p2: None,
            disp12_max_diff: 12,
            uniqueness_ratio: 10,
            speckle_window_size: 150,
            speckle_range: 2,
            pre_filter_cap: 63,
            mode: SgmMode::ThreeWay,
        }
    }
}

impl SgmParams {
    pub fn validate(&self) -> Result<(), DisparityError> {
        let invalid = |msg: String| Err(DisparityError::InvalidParameter(msg));
        if self.num_disparities == 0 || self.num_disparities % 16 != 0 {
            return invalid(format!(
                "num_disparities must be a positive multiple of 16, got {}",
                self.num_disparities
            ));
        }
        if self.block_size % 2 == 0 || !(1..=11).contains(&self.block_size) {
            return invalid(format!(
                "block_size must be odd and within 1..=11, got {}",
                self.block_size
            ));
        }
        if !(1..=63).contains(&self.pre_filter_cap) {
            return invalid(format!(
                "pre_filter_cap must be within 1..=63, got {}",
                self.pre_filter_cap
            ));
        }
        let max = MAX_DISPARITY as i64;
        let last = self.min_disparity as i64 + self.num_disparities as i64;
        if self.min_disparity as i64 <= -max || last > max {
            return invalid(format!(
                "disparities {}..{last} must stay within -{max} < d <= {max}",
                self.min_disparity
            ));
        }
        if let Some(p) = [self.p1, self.p2].into_iter().flatten().find(|&p| p > MAX_PENALTY) {
            return invalid(format!("penalty {p} exceeds {MAX_PENALTY}"));
        }
        if self.uniqueness_ratio >= 100 {
            return invalid(format!(
                "uniqueness_ratio must be below 100, got {}",
                self.uniqueness_ratio
            ));
        }
        Ok(())
    }

    /// Effective `(P1, P2)`, with `P2 > P1`.
    pub fn penalties(&self) -> (u32, u32) {
        let (d1, d2) = smoothness_penalties(PENALTY_CHANNELS, self.block_size);
        let p1 = self.p1.unwrap_or(d1);
        let p2 = self.p2.unwrap_or(d2).max(p1 + 1);
        (p1, p2)
    }

    /// Value written into pixels without a match.
    pub fn invalid_value(&self) -> f32 {
        self.min_disparity.saturating_sub(1) as f32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemiGlobalMatcher {
    pub params: SgmParams,
}

/// Horizontal Sobel response clipped to `±cap` and shifted to `0..=2cap`.
fn prefilter(img: &GrayImage, cap: i32) -> Vec<u8> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let src = img.as_raw();
    let mut out = vec![cap as u8; w * h];
    if w < 3 {
        return out;
    }
    for y in 0..h {
        let above = &src[y.saturating_sub(1) * w..][..w];
        let row = &src[y * w..][..w];
        let below = &src[(y + 1).min(h - 1) * w..][..w];
        for x in 1..w - 1 {
            let d = |r: &[u8]| r[x + 1] as i32 - r[x - 1] as i32;
            let v = 2 * d(row) + d(above) + d(below);
            out[y * w + x] = (v.clamp(-cap, cap) + cap) as u8;
        }
    }
    out
}

/// Cost volume geometry: columns `x0..x0 + cols`, disparities
/// `min_d..min_d + nd`.
#[derive(Clone, Copy, Debug)]
struct Volume {
    width: usize,
    height: usize,
    x0: usize,
    cols: usize,
    nd: usize,
    min_d: i32,
}

impl Volume {
    #[inline]
    fn at(&self, y: usize, xi: usize) -> usize {
        (y * self.cols + xi) * self.nd
    }
}

/// Per-pixel costs of one image row against every candidate disparity.
struct PixelCost<'a> {
    width: usize,
    nd: usize,
    min_d: i32,
    grad_left: Vec<u8>,
    grad_right: Vec<u8>,
    left: &'a [u8],
    right: &'a [u8],
}

impl<'a> PixelCost<'a> {
    fn new(left: &'a GrayImage, right: &'a GrayImage, vol: &Volume, cap: i32) -> Self {
        Self {
            width: vol.width,
            nd: vol.nd,
            min_d: vol.min_d,
            grad_left: prefilter(left, cap),
            grad_right: prefilter(right, cap),
            left: left.as_raw(),
            right: right.as_raw(),
        }
    }

    /// Costs of row `y` into `out` (`width * nd`); the right column is
    /// clamped to the image.
    fn row(&self, y: usize, out: &mut [u16]) {
        let (w, nd) = (self.width, self.nd);
        for x in 0..w {
            let l = y * w + x;
            for (k, c) in out[x * nd..(x + 1) * nd].iter_mut().enumerate() {
                let xr = (x as i64 - (self.min_d as i64 + k as i64)).clamp(0, w as i64 - 1);
                let r = y * w + xr as usize;
                let grad = self.grad_left[l].abs_diff(self.grad_right[r]) as u16;
                let raw = (self.left[l].abs_diff(self.right[r]) >> 2) as u16;
                *c = grad + raw;
            }
        }
    }

    /// Horizontal window sums of row `y` for the searchable columns.
    fn window_row(&self, y: usize, vol: &Volume, half: i64, pixel: &mut [u16], out: &mut [u16]) {
        let nd = self.nd;
        self.row(y, pixel);
        out.fill(0);
        for (xi, dst) in out.chunks_exact_mut(nd).enumerate() {
            let x = (vol.x0 + xi) as i64;
            for dx in -half..=half {
                let xx = (x + dx).clamp(0, self.width as i64 - 1) as usize;
                for (d, s) in dst.iter_mut().zip(&pixel[xx * nd..(xx + 1) * nd]) {
                    *d += *s;
                }
            }
        }
    }
}

/// Block-summed matching cost for every searchable column.
///
/// Rows are streamed through a ring of `block` horizontal sums, so only the
/// block-summed volume itself is held in full.
fn matching_cost(
    left: &GrayImage,
    right: &GrayImage,
    vol: &Volume,
    block: usize,
    cap: i32,
) -> Vec<u16> {
    let (w, h, nd) = (vol.width, vol.height, vol.nd);
    let costs = PixelCost::new(left, right, vol, cap);
    let half = block / 2;
    let line = vol.cols * nd;

    let mut pixel = vec![0u16; w * nd];
    let mut ring = vec![0u16; block * line];
    let slot = |yy: usize| (yy % block) * line;
    for yy in 0..=half.min(h - 1) {
        costs.window_row(yy, vol, half as i64, &mut pixel, &mut ring[slot(yy)..][..line]);
    }

    let mut cost = vec![0u16; h * line];
    for y in 0..h {
        let next = y + half;
        if y > 0 && next < h {
            costs.window_row(next, vol, half as i64, &mut pixel, &mut ring[slot(next)..][..line]);
        }
        let dst = &mut cost[y * line..(y + 1) * line];
        for dy in -(half as i64)..=half as i64 {
            let yy = (y as i64 + dy).clamp(0, h as i64 - 1) as usize;
            for (c, r) in dst.iter_mut().zip(&ring[slot(yy)..][..line]) {
                *c += *r;
            }
        }
    }
    cost
}

/// One path step: `L(p, d) = C(p, d) + min(L(p-r, d), L(p-r, d±1) + P1,
/// min L(p-r) + P2) - min L(p-r)`. Returns `min_d L(p, d)`.
#[inline]
fn path_step(cost: &[u16], prev: &[u32], prev_min: u32, p1: u32, p2: u32, out: &mut [u32]) -> u32 {
    let nd = cost.len();
    let jump = prev_min + p2;
    let mut lowest = u32::MAX;
    for k in 0..nd {
        let mut best = prev[k].min(jump);
        if k > 0 {
            best = best.min(prev[k - 1] + p1);
        }
        if k + 1 < nd {
            best = best.min(prev[k + 1] + p1);
        }
        let v = cost[k] as u32 + best - prev_min;
        out[k] = v;
        lowest = lowest.min(v);
    }
    lowest
}

/// Start of a path: `L(p, d) = C(p, d)`.
#[inline]
fn path_start(cost: &[u16], out: &mut [u32]) -> u32 {
    let mut lowest = u32::MAX;
    for (o, &c) in out.iter_mut().zip(cost) {
        *o = c as u32;
        lowest = lowest.min(*o);
    }
    lowest
}

/// Add the path costs along direction `(dx, dy)` into `total`.
fn aggregate(
    cost: &[u16],
    vol: &Volume,
    (dx, dy): (i32, i32),
    p1: u32,
    p2: u32,
    total: &mut [u32],
) {
    let (cols, h, nd) = (vol.cols, vol.height, vol.nd);

    if dy == 0 {
        let mut prev = vec![0u32; nd];
        let mut cur = vec![0u32; nd];
        for y in 0..h {
            let order: Box<dyn Iterator<Item = usize>> = if dx > 0 {
                Box::new(0..cols)
            } else {
                Box::new((0..cols).rev())
            };
            let mut prev_min = None;
            for xi in order {
                let c = &cost[vol.at(y, xi)..][..nd];
                let m = match prev_min {
                    None => path_start(c, &mut cur),
                    Some(pm) => path_step(c, &prev, pm, p1, p2, &mut cur),
                };
                for (t, v) in total[vol.at(y, xi)..][..nd].iter_mut().zip(&cur) {
                    *t += v;
                }
                prev_min = Some(m);
                std::mem::swap(&mut prev, &mut cur);
            }
        }
        return;
    }

    let mut prev = vec![0u32; cols * nd];
    let mut cur = vec![0u32; cols * nd];
    let mut prev_min = vec![0u32; cols];
    let mut cur_min = vec![0u32; cols];
    let rows: Box<dyn Iterator<Item = usize>> = if dy > 0 {
        Box::new(0..h)
    } else {
        Box::new((0..h).rev())
    };
    for (step, y) in rows.enumerate() {
        for xi in 0..cols {
            let c = &cost[vol.at(y, xi)..][..nd];
            let px = xi as i64 - dx as i64;
            let out = &mut cur[xi * nd..(xi + 1) * nd];
            cur_min[xi] = if step == 0 || px < 0 || px >= cols as i64 {
                path_start(c, out)
            } else {
                let px = px as usize;
                path_step(c, &prev[px * nd..(px + 1) * nd], prev_min[px], p1, p2, out)
            };
            for (t, v) in total[vol.at(y, xi)..][..nd].iter_mut().zip(out.iter()) {
                *t += v;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
        std::mem::swap(&mut prev_min, &mut cur_min);
    }
}

impl SemiGlobalMatcher {
    pub fn new(params: SgmParams) -> Self {
        Self { params }
    }

    fn volume(&self, width: u32, height: u32) -> Volume {
        let p = &self.params;
        let nd = p.num_disparities as usize;
        let max_d = p.min_disparity as i64 + nd as i64;
        let x0 = max_d.max(0);
        let x1 = width as i64 + (p.min_disparity as i64).min(0);
        Volume {
            width: width as usize,
            height: height as usize,
            x0: x0 as usize,
            cols: (x1 - x0).max(0) as usize,
            nd,
            min_d: p.min_disparity,
        }
    }
}

impl DisparityEngine for SemiGlobalMatcher {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(w = left.width(), h = left.height()))
    )]
    fn compute_with_progress(
        &self,
        left: &GrayImage,
        right: &GrayImage,
        progress: &dyn ProgressSink,
    ) -> Result<DisparityMap, DisparityError> {
        let p = &self.params;
        p.validate()?;
        DisparityError::check_dimensions(left.dimensions(), right.dimensions())?;

        let invalid = p.invalid_value();
        let mut map = DisparityMap::filled(left.width(), left.height(), invalid);
        let vol = self.volume(left.width(), left.height());
        if vol.cols == 0 || vol.height == 0 {
            debug!(
                "{}x{} image is narrower than the disparity range",
                left.width(),
                left.height()
            );
            return Ok(map);
        }

        let (p1, p2) = p.penalties();
        let cost = matching_cost(left, right, &vol, p.block_size as usize, p.pre_filter_cap as i32);

        let directions = p.mode.directions();
        let mut total = vec![0u32; cost.len()];
        progress.begin(STAGE, directions.len() + vol.height);
        for (i, &dir) in directions.iter().enumerate() {
            aggregate(&cost, &vol, dir, p1, p2, &mut total);
            progress.advance(STAGE, i + 1, directions.len() + vol.height);
        }
        drop(cost);

        let (w, nd) = (vol.width, vol.nd);
        let uniq = p.uniqueness_ratio;
        let mut rejected = 0usize;
        let mut right_cost = vec![u32::MAX; w];
        let mut right_disp = vec![i32::MIN; w];
        let mut best_int = vec![i32::MIN; vol.cols];

        for y in 0..vol.height {
            right_cost.fill(u32::MAX);
            right_disp.fill(i32::MIN);
            best_int.fill(i32::MIN);

            for xi in 0..vol.cols {
                let s = &total[vol.at(y, xi)..][..nd];
                let mut best = 0;
                for k in 1..nd {
                    if s[k] < s[best] {
                        best = k;
                    }
                }
                let min_s = s[best];

                // best match seen from the right view
                let xr = ((vol.x0 + xi) as i64 - (p.min_disparity as i64 + best as i64)) as usize;
                if min_s < right_cost[xr] {
                    right_cost[xr] = min_s;
                    right_disp[xr] = p.min_disparity + best as i32;
                }

                let ambiguous = (0..nd).any(|k| {
                    k.abs_diff(best) > 1
                        && (s[k] as u64) * (100 - uniq as u64) < (min_s as u64) * 100
                });
                if ambiguous {
                    rejected += 1;
                    continue;
                }

                let mut d = best as f32;
                if best > 0 && best + 1 < nd {
                    let (a, c) = (s[best - 1] as i64, s[best + 1] as i64);
                    let denom = (a + c - 2 * min_s as i64).max(1);
                    d += (a - c) as f32 / (2 * denom) as f32;
                }
                best_int[xi] = p.min_disparity + best as i32;
                map.set((vol.x0 + xi) as u32, y as u32, p.min_disparity as f32 + d);
            }

            if p.disp12_max_diff >= 0 {
                for xi in 0..vol.cols {
                    if best_int[xi] == i32::MIN {
                        continue;
                    }
                    let x = vol.x0 + xi;
                    let d = map.get(x as u32, y as u32);
                    let (lo, hi) = (d.floor() as i64, d.ceil() as i64);
                    let disagrees = |dd: i64| {
                        let xr = x as i64 - dd;
                        if xr < 0 || xr >= w as i64 {
                            return false;
                        }
                        let r = right_disp[xr as usize];
                        r != i32::MIN && (r as i64 - dd).abs() > p.disp12_max_diff as i64
                    };
                    if disagrees(lo) && disagrees(hi) {
                        map.set(x as u32, y as u32, invalid);
                        rejected += 1;
                    }
                }
            }
            progress.advance(STAGE, directions.len() + y + 1, directions.len() + vol.height);
        }

        if p.speckle_window_size > 0 {
            let removed = filter_speckles(
                &mut map,
                invalid,
                p.speckle_window_size as usize,
                p.speckle_range as f32,
            );
            debug!("speckle filter removed {removed} pixels");
        }
        debug!("{rejected} pixels failed the uniqueness or left-right checks");
        progress.finish(STAGE);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn default_penalties_use_two_channels() {
        let p = SgmParams::default();
        assert_eq!((144, 576), p.penalties());
        assert_eq!((8 * 3 * 25, 32 * 3 * 25), smoothness_penalties(3, 5));
        assert_eq!(-2.0, p.invalid_value());
    }

    #[test]
    fn p2_stays_above_p1() {
        let p = SgmParams {
            p1: Some(100),
            p2: Some(50),
            ..SgmParams::default()
        };
        assert_eq!((100, 101), p.penalties());
    }

    #[test]
    fn parameters_are_validated() {
        let bad = [
            SgmParams {
                num_disparities: 24,
                ..SgmParams::default()
            },
            SgmParams {
                block_size: 4,
                ..SgmParams::default()
            },
            SgmParams {
                block_size: 13,
                ..SgmParams::default()
            },
            SgmParams {
                pre_filter_cap: 0,
                ..SgmParams::default()
            },
        ];
        for params in bad {
            assert!(params.validate().is_err(), "{params:?}");
        }
        assert!(SgmParams::default().validate().is_ok());
    }

    #[test]
    fn disparity_range_is_bounded() {
        let with_min = |min_disparity| SgmParams {
            min_disparity,
            ..SgmParams::default()
        };
        for p in [
            with_min(i32::MIN),
            with_min(i32::MAX - 8),
            with_min(-MAX_DISPARITY),
            with_min(MAX_DISPARITY - 79),
        ] {
            assert!(
                matches!(p.validate(), Err(DisparityError::InvalidParameter(_))),
                "{p:?}"
            );
        }
        assert!(with_min(-MAX_DISPARITY + 1).validate().is_ok());
        assert!(with_min(MAX_DISPARITY - 80).validate().is_ok());
        assert_eq!(i32::MIN as f32, with_min(i32::MIN).invalid_value());

        let huge_penalty = SgmParams {
            p2: Some(u32::MAX),
            ..SgmParams::default()
        };
        assert!(huge_penalty.validate().is_err());

        let img = GrayImage::new(32, 8);
        let err = SemiGlobalMatcher::new(with_min(i32::MIN)).compute(&img, &img);
        assert!(matches!(err, Err(DisparityError::InvalidParameter(_))));
    }

    #[test]
    fn streamed_cost_matches_direct_window_sum() {
        let texture = |seed: u32| {
            GrayImage::from_fn(40, 9, |x, y| {
                Luma([((x * 37 + y * 101 + seed).wrapping_mul(2654435761) >> 24) as u8])
            })
        };
        let (left, right) = (texture(1), texture(7));
        for (block, h) in [(1, 9), (5, 9), (11, 4)] {
            let left = image::imageops::crop_imm(&left, 0, 0, 40, h).to_image();
            let right = image::imageops::crop_imm(&right, 0, 0, 40, h).to_image();
            let params = SgmParams {
                num_disparities: 16,
                block_size: block,
                ..SgmParams::default()
            };
            let vol = SemiGlobalMatcher::new(params).volume(40, h);
            let streamed = matching_cost(&left, &right, &vol, block as usize, 63);

            let pc = PixelCost::new(&left, &right, &vol, 63);
            let (w, nd, hh) = (vol.width, vol.nd, h as i64);
            let mut pixel = vec![0u16; vol.height * w * nd];
            for y in 0..vol.height {
                pc.row(y, &mut pixel[y * w * nd..(y + 1) * w * nd]);
            }
            let half = (block / 2) as i64;
            for y in 0..vol.height {
                for xi in 0..vol.cols {
                    for k in 0..nd {
                        let mut sum = 0u16;
                        for dy in -half..=half {
                            for dx in -half..=half {
                                let yy = (y as i64 + dy).clamp(0, hh - 1) as usize;
                                let xx = ((vol.x0 + xi) as i64 + dx).clamp(0, w as i64 - 1);
                                sum += pixel[(yy * w + xx as usize) * nd + k];
                            }
                        }
                        assert_eq!(sum, streamed[vol.at(y, xi) + k], "block {block} ({xi}, {y})");
                    }
                }
            }
        }
    }

    #[test]
    fn mode_direction_counts() {
        assert_eq!(5, SgmMode::Sgbm.directions().len());
        assert_eq!(8, SgmMode::Full.directions().len());
        assert_eq!(3, SgmMode::ThreeWay.directions().len());
    }

    #[test]
    fn prefilter_of_flat_image_is_cap() {
        let img = GrayImage::from_pixel(5, 3, Luma([77]));
        assert!(prefilter(&img, 31).iter().all(|&v| v == 31));
    }

    #[test]
    fn prefilter_clips_strong_edges() {
        let img = GrayImage::from_fn(4, 3, |x, _| Luma([if x < 2 { 0 } else { 255 }]));
        let f = prefilter(&img, 15);
        assert_eq!(30, f[1 + 4]);
        assert_eq!(15, f[4]);
    }

    #[test]
    fn path_step_prefers_smooth_transitions() {
        let cost = [10u16, 10, 10];
        let prev = [0u32, 50, 100];
        let mut out = [0u32; 3];
        let lowest = path_step(&cost, &prev, 0, 5, 20, &mut out);
        assert_eq!([10, 15, 30], out);
        assert_eq!(10, lowest);
    }

    #[test]
    fn narrow_image_is_all_invalid() {
        let img = GrayImage::from_pixel(40, 8, Luma([10]));
        let map = SemiGlobalMatcher::default().compute(&img, &img).unwrap();
        assert!(map.data.iter().all(|&d| d == -2.0));
    }
}
