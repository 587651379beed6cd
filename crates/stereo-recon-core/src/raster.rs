/// Borrowed single-channel view used by the sampling helpers.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl<'a> GrayImageView<'a> {
    pub fn from_image(img: &'a ::image::GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw(),
        }
    }

    /// Pixel with border replication.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> u8 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width + x]
    }
}

/// Bilinear sample with border replication.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = src.get_clamped(x0, y0) as f64;
    let p10 = src.get_clamped(x0 + 1, y0) as f64;
    let p01 = src.get_clamped(x0, y0 + 1) as f64;
    let p11 = src.get_clamped(x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Grayscale conversion with fixed BT.601 weights (0.299, 0.587, 0.114).
///
/// `image::DynamicImage::to_luma8` uses Rec.709 weights; disparity results
/// are tuned against BT.601 luma.
pub fn luma_bt601(rgb: &::image::RgbImage) -> ::image::GrayImage {
    ::image::GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let v = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        ::image::Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let data = [0u8, 100, 200, 50];
        let view = GrayImageView {
            width: 2,
            height: 2,
            data: &data,
        };
        assert_eq!(50.0, sample_bilinear(&view, 0.5, 0.0));
        assert_eq!(87.5, sample_bilinear(&view, 0.5, 0.5));
        // outside samples replicate the border
        assert_eq!(0.0, sample_bilinear(&view, -3.0, -3.0));
    }

    #[test]
    fn bt601_weights_are_used() {
        let mut rgb = ::image::RgbImage::new(3, 1);
        rgb.put_pixel(0, 0, ::image::Rgb([255, 0, 0]));
        rgb.put_pixel(1, 0, ::image::Rgb([0, 255, 0]));
        rgb.put_pixel(2, 0, ::image::Rgb([0, 0, 255]));
        let gray = luma_bt601(&rgb);
        assert_eq!(76, gray.get_pixel(0, 0).0[0]);
        assert_eq!(150, gray.get_pixel(1, 0).0[0]);
        assert_eq!(29, gray.get_pixel(2, 0).0[0]);
    }
}
