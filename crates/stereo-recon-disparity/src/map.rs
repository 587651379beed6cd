use image::{GrayImage, Luma};

/// Dense per-pixel horizontal disparity, row-major.
///
/// There is no separate validity channel: matchers write a value below every
/// real disparity into rejected pixels, so the map's minimum marks "no
/// match".
#[derive(Clone, Debug, PartialEq)]
pub struct DisparityMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DisparityMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0.0)
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Wrap row-major values; `None` when the length does not match.
    pub fn from_vec(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        let w = self.width as usize;
        self.data[y as usize * w + x as usize] = value;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn min_value(&self) -> Option<f32> {
        self.data.iter().copied().reduce(f32::min)
    }

    pub fn max_value(&self) -> Option<f32> {
        self.data.iter().copied().reduce(f32::max)
    }

    /// Min-max normalized 8-bit rendering; a constant map renders black.
    pub fn to_image(&self) -> GrayImage {
        let lo = self.min_value().unwrap_or(0.0);
        let hi = self.max_value().unwrap_or(0.0);
        let range = hi - lo;
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = if range > 0.0 {
                ((self.get(x, y) - lo) / range * 255.0).round()
            } else {
                0.0
            };
            Luma([v.clamp(0.0, 255.0) as u8])
        })
    }
}
