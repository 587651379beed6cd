//! Debug rendering of detected corners.

use crate::pattern::ObservedCorners;
use image::{Rgb, RgbImage};
use nalgebra::Point2;

const ROW_COLORS: [[u8; 3]; 7] = [
    [255, 0, 0],
    [255, 128, 0],
    [200, 200, 0],
    [0, 255, 0],
    [0, 200, 200],
    [0, 0, 255],
    [255, 0, 255],
];

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn line(img: &mut RgbImage, a: Point2<f64>, b: Point2<f64>, color: Rgb<u8>) {
    let steps = (b - a).abs().max().ceil().max(1.0) as usize;
    for s in 0..=steps {
        let t = s as f64 / steps as f64;
        let p = a + (b - a) * t;
        put(img, p.x.round() as i64, p.y.round() as i64, color);
    }
}

fn circle(img: &mut RgbImage, c: Point2<f64>, radius: f64, color: Rgb<u8>) {
    let n = (radius * 8.0).ceil().max(8.0) as usize;
    for k in 0..n {
        let t = k as f64 / n as f64 * std::f64::consts::TAU;
        put(
            img,
            (c.x + radius * t.cos()).round() as i64,
            (c.y + radius * t.sin()).round() as i64,
            color,
        );
    }
}

/// Draw corners as circles, colored per row and chained in detection order.
pub fn draw_corners(img: &mut RgbImage, corners: &ObservedCorners) {
    let mut prev: Option<Point2<f64>> = None;
    for j in 0..corners.rows {
        let color = Rgb(ROW_COLORS[j as usize % ROW_COLORS.len()]);
        for i in 0..corners.cols {
            let p = corners.at(i, j);
            circle(img, p, 4.0, color);
            put(img, p.x.round() as i64, p.y.round() as i64, color);
            if let Some(q) = prev {
                line(img, q, p, color);
            }
            prev = Some(p);
        }
    }
}
