use crate::{CloudError, ColoredPoint, PointCloud};
use image::RgbImage;
use nalgebra::{Matrix4, Point3, Vector4};
use stereo_recon_disparity::DisparityMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Reproject every pixel: `(X, Y, Z, W) = Q · (col, row, d, 1)`, divided by
/// `W`. Output is in pixel-scan order; pixels with `W = 0` come out
/// non-finite.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
pub fn project(disparity: &DisparityMap, q: &Matrix4<f64>) -> Vec<Point3<f32>> {
    let w = disparity.width as usize;
    disparity
        .data
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            let (col, row) = ((i % w.max(1)) as f64, (i / w.max(1)) as f64);
            let h = q * Vector4::new(col, row, d as f64, 1.0);
            let p = h.xyz() / h.w;
            Point3::new(p.x as f32, p.y as f32, p.z as f32)
        })
        .collect()
}

/// `true` for every pixel whose disparity is above the map's minimum.
///
/// Matchers write their "no match" value below all real disparities, so the
/// minimum is taken to mean "no correspondence". A map whose values are all
/// equal therefore has no valid pixel.
pub fn valid_mask(disparity: &DisparityMap) -> Vec<bool> {
    let Some(min) = disparity.min_value() else {
        return Vec::new();
    };
    disparity.data.iter().map(|&d| d > min).collect()
}

/// Pair masked points with the color of their source pixel.
///
/// Points that reproject to non-finite coordinates are dropped.
pub fn attach_color(
    points: &[Point3<f32>],
    mask: &[bool],
    color: &RgbImage,
) -> Result<PointCloud, CloudError> {
    let pixels = color.width() as usize * color.height() as usize;
    if points.len() != pixels {
        return Err(CloudError::LengthMismatch {
            what: "point list",
            expected: pixels,
            found: points.len(),
        });
    }
    if mask.len() != pixels {
        return Err(CloudError::LengthMismatch {
            what: "mask",
            expected: pixels,
            found: mask.len(),
        });
    }

    let mut skipped = 0usize;
    let cloud: Vec<ColoredPoint> = points
        .iter()
        .zip(mask)
        .zip(color.pixels())
        .filter(|((_, &keep), _)| keep)
        .filter_map(|((p, _), rgb)| {
            if p.coords.iter().all(|v| v.is_finite()) {
                Some(ColoredPoint {
                    position: *p,
                    color: rgb.0,
                })
            } else {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        log::debug!("dropped {skipped} masked points at infinity");
    }
    Ok(PointCloud { points: cloud })
}

/// `project`, `valid_mask` and `attach_color` in one call.
pub fn reconstruct(
    disparity: &DisparityMap,
    q: &Matrix4<f64>,
    color: &RgbImage,
) -> Result<PointCloud, CloudError> {
    if color.dimensions() != (disparity.width, disparity.height) {
        return Err(CloudError::ImageDimensionMismatch {
            width: disparity.width,
            height: disparity.height,
            found_width: color.width(),
            found_height: color.height(),
        });
    }
    let points = project(disparity, q);
    let mask = valid_mask(disparity);
    let cloud = attach_color(&points, &mask, color)?;
    log::info!(
        "{} of {} pixels reprojected",
        cloud.len(),
        disparity.data.len()
    );
    Ok(cloud)
}
