//! Undistort-rectify lookup maps and bilinear remapping.

use crate::error::CalibrationError;
use image::{ImageBuffer, Pixel};
use nalgebra::{Matrix3, Matrix3x4, Vector3};
use stereo_recon_core::{ImageSize, PinholeCamera};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// For every output pixel, the source position it is sampled from.
#[derive(Clone, Debug)]
pub struct RectifyMap {
    pub width: u32,
    pub height: u32,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl RectifyMap {
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    #[inline]
    pub fn source(&self, x: u32, y: u32) -> (f32, f32) {
        let i = y as usize * self.width as usize + x as usize;
        (self.map_x[i], self.map_y[i])
    }
}

/// Build the map that undistorts `camera`, applies the rectifying rotation
/// `r` and reprojects with the rectified projection `p`.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(size = %size)))]
pub fn init_rectify_map(
    camera: &PinholeCamera,
    r: &Matrix3<f64>,
    p: &Matrix3x4<f64>,
    size: ImageSize,
) -> Result<RectifyMap, CalibrationError> {
    let new_k: Matrix3<f64> = p.fixed_view::<3, 3>(0, 0).into_owned();
    let inv = (new_k * r)
        .try_inverse()
        .ok_or_else(|| CalibrationError::Computation("singular rectified projection".to_string()))?;

    let n = size.width as usize * size.height as usize;
    let mut map_x = Vec::with_capacity(n);
    let mut map_y = Vec::with_capacity(n);
    for v in 0..size.height {
        for u in 0..size.width {
            let ray = inv * Vector3::new(u as f64, v as f64, 1.0);
            let (x, y) = if ray.z.abs() > f64::EPSILON {
                (ray.x / ray.z, ray.y / ray.z)
            } else {
                (f64::INFINITY, f64::INFINITY)
            };
            let (xd, yd) = camera.distortion.distort(x, y);
            map_x.push((camera.fx * xd + camera.cx) as f32);
            map_y.push((camera.fy * yd + camera.cy) as f32);
        }
    }
    Ok(RectifyMap {
        width: size.width,
        height: size.height,
        map_x,
        map_y,
    })
}

/// Resample `src` through `map`; samples outside the source are black.
pub fn remap<P>(src: &ImageBuffer<P, Vec<u8>>, map: &RectifyMap) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let channels = P::CHANNEL_COUNT as usize;
    let (sw, sh) = (src.width() as i64, src.height() as i64);
    let raw = src.as_raw();
    let mut out = vec![0u8; map.width as usize * map.height as usize * channels];

    for (i, dst) in out.chunks_exact_mut(channels).enumerate() {
        let (fx, fy) = (map.map_x[i], map.map_y[i]);
        // no tap reaches the source; also rejects NaN and infinities
        let inside = |f: f32, n: i64| f > -1.0 && f < n as f32;
        if !(inside(fx, sw) && inside(fy, sh)) {
            continue;
        }
        let (x0, y0) = (fx.floor() as i64, fy.floor() as i64);
        let (ax, ay) = (fx - x0 as f32, fy - y0 as f32);
        let taps = [
            (x0, y0, (1.0 - ax) * (1.0 - ay)),
            (x0 + 1, y0, ax * (1.0 - ay)),
            (x0, y0 + 1, (1.0 - ax) * ay),
            (x0 + 1, y0 + 1, ax * ay),
        ];
        for (c, value) in dst.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for &(x, y, w) in &taps {
                if x >= 0 && y >= 0 && x < sw && y < sh {
                    acc += w * raw[(y * sw + x) as usize * channels + c] as f32;
                }
            }
            *value = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    // the buffer length always matches the map dimensions
    ImageBuffer::from_raw(map.width, map.height, out)
        .unwrap_or_else(|| ImageBuffer::new(map.width, map.height))
}
