//! Gradient-orthogonality corner refinement.
//!
//! At a true saddle point every image gradient `g(p)` in the window is
//! orthogonal to `p - q`. The refined corner `q` solves the weighted normal
//! equations `Σ w g gᵀ · q = Σ w g gᵀ · p`, re-sampling the window around the
//! new estimate until the shift drops below the criterion's epsilon.

use crate::params::SubPixParams;
use nalgebra::{Matrix2, Point2, Vector2};
use stereo_recon_core::{sample_bilinear, GrayImageView, TermCriteria};

/// Refine every corner in place.
pub fn refine_corners(
    image: &GrayImageView<'_>,
    corners: &mut [Point2<f64>],
    params: &SubPixParams,
    criteria: &TermCriteria,
) {
    let weights = window_weights(params.half_window as i32);
    for c in corners.iter_mut() {
        *c = refine_with_weights(image, *c, params, criteria, &weights);
    }
}

pub fn refine_corner(
    image: &GrayImageView<'_>,
    initial: Point2<f64>,
    params: &SubPixParams,
    criteria: &TermCriteria,
) -> Point2<f64> {
    let weights = window_weights(params.half_window as i32);
    refine_with_weights(image, initial, params, criteria, &weights)
}

/// Separable Gaussian-like weights over the normalized window `[-1, 1]²`.
fn window_weights(hw: i32) -> Vec<f64> {
    let side = (2 * hw + 1) as usize;
    let scale = hw.max(1) as f64;
    let axis: Vec<f64> = (-hw..=hw)
        .map(|d| {
            let x = d as f64 / scale;
            (-x * x).exp()
        })
        .collect();
    let mut w = Vec::with_capacity(side * side);
    for wy in &axis {
        for wx in &axis {
            w.push(wy * wx);
        }
    }
    w
}

fn refine_with_weights(
    image: &GrayImageView<'_>,
    initial: Point2<f64>,
    params: &SubPixParams,
    criteria: &TermCriteria,
    weights: &[f64],
) -> Point2<f64> {
    let hw = params.half_window as i32;
    let side = (2 * hw + 1) as usize;
    let patch_side = side + 2;
    let mut patch = vec![0.0f64; patch_side * patch_side];
    let mut current = initial;

    for _ in 0..criteria.max_iters.max(1) {
        // sample with a one-pixel margin for central differences
        for (py, dy) in (-hw - 1..=hw + 1).enumerate() {
            for (px, dx) in (-hw - 1..=hw + 1).enumerate() {
                patch[py * patch_side + px] =
                    sample_bilinear(image, current.x + dx as f64, current.y + dy as f64);
            }
        }

        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();
        for wy in 0..side {
            let py = wy + 1;
            let oy = wy as f64 - hw as f64;
            for wx in 0..side {
                let px = wx + 1;
                let ox = wx as f64 - hw as f64;
                let gx = patch[py * patch_side + px + 1] - patch[py * patch_side + px - 1];
                let gy = patch[(py + 1) * patch_side + px] - patch[(py - 1) * patch_side + px];
                let m = weights[wy * side + wx];

                let gxx = m * gx * gx;
                let gxy = m * gx * gy;
                let gyy = m * gy * gy;
                a[(0, 0)] += gxx;
                a[(0, 1)] += gxy;
                a[(1, 1)] += gyy;
                b.x += gxx * ox + gxy * oy;
                b.y += gxy * ox + gyy * oy;
            }
        }
        a[(1, 0)] = a[(0, 1)];

        let Some(inv) = a.try_inverse() else {
            break;
        };
        let shift = inv * b;
        if !shift.iter().all(|v| v.is_finite()) {
            break;
        }
        current += shift;
        if criteria.converged(shift.norm()) {
            break;
        }
    }

    if (current - initial).norm() > hw as f64 {
        return initial;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Supersampled render of an axis-aligned checkerboard with squares of
    /// `square` pixels and the board origin at `(ox, oy)`.
    fn render_board(w: u32, h: u32, square: f64, ox: f64, oy: f64) -> Vec<u8> {
        let ss = 4;
        let mut data = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0u32;
                for sy in 0..ss {
                    for sx in 0..ss {
                        let fx = x as f64 + (sx as f64 + 0.5) / ss as f64 - 0.5;
                        let fy = y as f64 + (sy as f64 + 0.5) / ss as f64 - 0.5;
                        let i = ((fx - ox) / square).floor() as i64;
                        let j = ((fy - oy) / square).floor() as i64;
                        if (i + j).rem_euclid(2) == 0 {
                            acc += 230;
                        } else {
                            acc += 25;
                        }
                    }
                }
                data.push((acc / (ss * ss) as u32) as u8);
            }
        }
        data
    }

    #[test]
    fn converges_to_saddle_point() {
        let (w, h) = (120u32, 120u32);
        let data = render_board(w, h, 30.0, 0.3, 0.7);
        let view = GrayImageView {
            width: w as usize,
            height: h as usize,
            data: &data,
        };
        let params = SubPixParams { half_window: 11 };
        let criteria = TermCriteria::new(30, 1e-4);

        // corner at (60.3, 60.7), seeded 2 px off
        let refined = refine_corner(&view, Point2::new(58.8, 62.1), &params, &criteria);
        assert!((refined.x - 60.3).abs() < 0.05, "x = {}", refined.x);
        assert!((refined.y - 60.7).abs() < 0.05, "y = {}", refined.y);
    }

    #[test]
    fn flat_region_keeps_initial_estimate() {
        let data = vec![128u8; 64 * 64];
        let view = GrayImageView {
            width: 64,
            height: 64,
            data: &data,
        };
        let start = Point2::new(31.5, 30.25);
        let refined = refine_corner(
            &view,
            start,
            &SubPixParams::default(),
            &TermCriteria::default(),
        );
        assert_eq!(start, refined);
    }
}
