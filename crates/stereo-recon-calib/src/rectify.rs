//! Bouguet rectification of a calibrated stereo rig.
//!
//! Each camera is rotated by half of the relative rotation so both image
//! planes become coplanar, then both are turned about the optical axis so
//! the baseline lies along the image rows (or columns for a vertical rig).
//! A common focal length is chosen and `alpha` interpolates between keeping
//! only valid pixels (`0`) and keeping every source pixel (`1`).

use crate::error::CalibrationError;
use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Vector3};
use serde::{Deserialize, Serialize};
use stereo_recon_core::{rodrigues, rotation_to_rvec, ImageSize, PinholeCamera, TermCriteria};

#[cfg(feature = "tracing")]
use tracing::instrument;

const GRID: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyOptions {
    /// `0` crops to valid pixels only, `1` keeps the full field of view,
    /// negative leaves the focal length unscaled.
    pub alpha: f64,
    /// Share one principal point between both rectified views.
    pub zero_disparity: bool,
}

impl Default for RectifyOptions {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            zero_disparity: true,
        }
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn clipped(x: f64, y: f64, w: f64, h: f64, size: ImageSize) -> Self {
        let x0 = x.max(0.0);
        let y0 = y.max(0.0);
        let x1 = (x + w).min(size.width as f64);
        let y1 = (y + h).min(size.height as f64);
        if !(x1 > x0 && y1 > y0) {
            return Self::default();
        }
        Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        }
    }
}

/// Rectifying rotations, rectified projections and the disparity-to-depth
/// matrix `Q`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RectificationTransform {
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
    pub q: Matrix4<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rectification {
    pub transform: RectificationTransform,
    /// Region of the rectified left image where every pixel is valid.
    pub roi_left: Roi,
    pub roi_right: Roi,
}

#[derive(Clone, Copy, Debug)]
struct Rect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

/// Inner (all-valid) and outer (bounding) rectangles of the undistorted,
/// rotated image border.
fn border_rectangles(
    camera: &PinholeCamera,
    rotation: &Matrix3<f64>,
    new_k: &Matrix3<f64>,
    size: ImageSize,
    criteria: &TermCriteria,
) -> (Rect, Rect) {
    let (w, h) = (size.width as f64 - 1.0, size.height as f64 - 1.0);
    let (mut ix0, mut ix1, mut iy0, mut iy1) = (f64::MIN, f64::MAX, f64::MIN, f64::MAX);
    let (mut ox0, mut ox1, mut oy0, mut oy1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);

    for y in 0..GRID {
        for x in 0..GRID {
            let src = Point2::new(
                x as f64 * w / (GRID - 1) as f64,
                y as f64 * h / (GRID - 1) as f64,
            );
            let p = camera.undistort_pixel(&src, rotation, new_k, criteria);
            ox0 = ox0.min(p.x);
            ox1 = ox1.max(p.x);
            oy0 = oy0.min(p.y);
            oy1 = oy1.max(p.y);
            if x == 0 {
                ix0 = ix0.max(p.x);
            }
            if x == GRID - 1 {
                ix1 = ix1.min(p.x);
            }
            if y == 0 {
                iy0 = iy0.max(p.y);
            }
            if y == GRID - 1 {
                iy1 = iy1.min(p.y);
            }
        }
    }
    (
        Rect {
            x: ix0,
            y: iy0,
            w: ix1 - ix0,
            h: iy1 - iy0,
        },
        Rect {
            x: ox0,
            y: oy0,
            w: ox1 - ox0,
            h: oy1 - oy0,
        },
    )
}

/// Scale that maps `rect` (around centre `c0`) onto the image around `c`.
/// `pick` folds the four per-edge ratios.
fn edge_scale(
    rect: &Rect,
    c0: Point2<f64>,
    c: Point2<f64>,
    size: ImageSize,
    pick: fn(f64, f64) -> f64,
) -> f64 {
    let (w, h) = (size.width as f64, size.height as f64);
    [
        c.x / (c0.x - rect.x),
        c.y / (c0.y - rect.y),
        (w - c.x) / (rect.x + rect.w - c0.x),
        (h - c.y) / (rect.y + rect.h - c0.y),
    ]
    .into_iter()
    .reduce(pick)
    .unwrap_or(1.0)
}

/// Compute the rectification of a rig with `X_right = R * X_left + T`.
///
/// `criteria` stops the undistortion of the image border samples.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
pub fn stereo_rectify(
    left: &PinholeCamera,
    right: &PinholeCamera,
    image_size: ImageSize,
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    options: &RectifyOptions,
    criteria: &TermCriteria,
) -> Result<Rectification, CalibrationError> {
    if image_size.width < 2 || image_size.height < 2 {
        return Err(CalibrationError::Computation(format!(
            "cannot rectify {image_size} images"
        )));
    }
    if t.norm() <= f64::EPSILON {
        return Err(CalibrationError::Computation(
            "zero baseline between cameras".to_string(),
        ));
    }

    // split the relative rotation between both cameras
    let om = rotation_to_rvec(r);
    let r_half = rodrigues(&(-om * 0.5));
    let t_half = r_half * t;

    let idx = if t_half.x.abs() > t_half.y.abs() { 0 } else { 1 };
    let c = t_half[idx];
    let mut uu = Vector3::zeros();
    uu[idx] = if c > 0.0 { 1.0 } else { -1.0 };

    // align the baseline with the image axis
    let mut ww = t_half.cross(&uu);
    let nw = ww.norm();
    if nw > 0.0 {
        ww *= (c.abs() / t_half.norm()).clamp(-1.0, 1.0).acos() / nw;
    }
    let w_r = rodrigues(&ww);
    let r1 = w_r * r_half.transpose();
    let r2 = w_r * r_half;
    let t_new = r2 * t;

    let (nx, ny) = (image_size.width as f64, image_size.height as f64);
    let mut fc_new = f64::MAX;
    for cam in [left, right] {
        let mut fc = if idx == 0 { cam.fy } else { cam.fx };
        let k1 = cam.distortion.k1;
        if k1 < 0.0 {
            fc *= 1.0 + k1 * (nx * nx + ny * ny) / (4.0 * fc * fc);
        }
        fc_new = fc_new.min(fc);
    }

    // principal points that centre the rotated image corners
    let ideal = Matrix3::new(fc_new, 0.0, 0.0, 0.0, fc_new, 0.0, 0.0, 0.0, 1.0);
    let corners = [
        Point2::new(0.0, 0.0),
        Point2::new(nx - 1.0, 0.0),
        Point2::new(0.0, ny - 1.0),
        Point2::new(nx - 1.0, ny - 1.0),
    ];
    let mut cc = [Point2::origin(); 2];
    for (k, (cam, rot)) in [(left, &r1), (right, &r2)].into_iter().enumerate() {
        let sum = corners
            .iter()
            .map(|p| cam.undistort_pixel(p, rot, &ideal, criteria).coords)
            .sum::<nalgebra::Vector2<f64>>();
        let avg = sum / corners.len() as f64;
        cc[k] = Point2::new((nx - 1.0) * 0.5 - avg.x, (ny - 1.0) * 0.5 - avg.y);
    }
    if options.zero_disparity {
        let mid = Point2::from((cc[0].coords + cc[1].coords) * 0.5);
        cc = [mid, mid];
    } else if idx == 0 {
        let y = (cc[0].y + cc[1].y) * 0.5;
        cc[0].y = y;
        cc[1].y = y;
    } else {
        let x = (cc[0].x + cc[1].x) * 0.5;
        cc[0].x = x;
        cc[1].x = x;
    }

    let new_k = |fc: f64, c: Point2<f64>| Matrix3::new(fc, 0.0, c.x, 0.0, fc, c.y, 0.0, 0.0, 1.0);
    let (inner1, outer1) =
        border_rectangles(left, &r1, &new_k(fc_new, cc[0]), image_size, criteria);
    let (inner2, outer2) =
        border_rectangles(right, &r2, &new_k(fc_new, cc[1]), image_size, criteria);

    let s = if options.alpha >= 0.0 {
        let s0 = edge_scale(&inner1, cc[0], cc[0], image_size, f64::max)
            .max(edge_scale(&inner2, cc[1], cc[1], image_size, f64::max));
        let s1 = edge_scale(&outer1, cc[0], cc[0], image_size, f64::min)
            .min(edge_scale(&outer2, cc[1], cc[1], image_size, f64::min));
        let alpha = options.alpha.min(1.0);
        s0 * (1.0 - alpha) + s1 * alpha
    } else {
        1.0
    };
    if !(s.is_finite() && s > 0.0) {
        return Err(CalibrationError::Computation(format!(
            "degenerate rectification scale {s}"
        )));
    }
    let fc = fc_new * s;

    let projection = |c: Point2<f64>| {
        let mut p = Matrix3x4::zeros();
        p.fixed_view_mut::<3, 3>(0, 0).copy_from(&new_k(fc, c));
        p
    };
    let p1 = projection(cc[0]);
    let mut p2 = projection(cc[1]);
    p2[(idx, 3)] = t_new[idx] * fc;

    let tx = t_new[idx];
    let shift = if idx == 0 { cc[0].x - cc[1].x } else { cc[0].y - cc[1].y };
    let q = Matrix4::new(
        1.0, 0.0, 0.0, -cc[0].x, //
        0.0, 1.0, 0.0, -cc[0].y, //
        0.0, 0.0, 0.0, fc, //
        0.0, 0.0, -1.0 / tx, shift / tx,
    );

    let roi = |inner: &Rect, c: Point2<f64>| {
        Roi::clipped(
            ((inner.x - c.x) * s + c.x).ceil(),
            ((inner.y - c.y) * s + c.y).ceil(),
            (inner.w * s).floor(),
            (inner.h * s).floor(),
            image_size,
        )
    };
    let rectification = Rectification {
        transform: RectificationTransform { r1, r2, p1, p2, q },
        roi_left: roi(&inner1, cc[0]),
        roi_right: roi(&inner2, cc[1]),
    };
    log::debug!(
        "rectified focal {fc:.2}, principal points ({:.1}, {:.1}) / ({:.1}, {:.1}), {} baseline",
        cc[0].x,
        cc[0].y,
        cc[1].x,
        cc[1].y,
        if idx == 0 { "horizontal" } else { "vertical" }
    );
    Ok(rectification)
}
