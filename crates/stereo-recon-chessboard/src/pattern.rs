use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PatternError {
    #[error("pattern needs at least 2x2 inner corners (got {cols}x{rows})")]
    TooSmall { cols: u32, rows: u32 },
    #[error("square size must be positive and finite (got {0})")]
    InvalidSquareSize(f64),
    #[error("expected {expected} corners for the pattern, got {found}")]
    CornerCount { expected: usize, found: usize },
}

/// Planar chessboard described by its inner-corner grid.
///
/// The default is a 9x6 inner-corner board with 25 mm squares, expressed in
/// metres; the same board serves camera and stereo calibration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPattern {
    /// Inner corners along a row (board x axis).
    pub cols: u32,
    /// Inner corners along a column (board y axis).
    pub rows: u32,
    /// Edge length of one square, in the caller's length unit.
    pub square_size: f64,
}

impl Default for CalibrationPattern {
    fn default() -> Self {
        Self {
            cols: 9,
            rows: 6,
            square_size: 0.025,
        }
    }
}

impl CalibrationPattern {
    pub fn new(cols: u32, rows: u32, square_size: f64) -> Result<Self, PatternError> {
        let p = Self {
            cols,
            rows,
            square_size,
        };
        p.validate()?;
        Ok(p)
    }

    /// Board given by its square counts; inner corners are one fewer per axis.
    pub fn from_squares(
        squares_x: u32,
        squares_y: u32,
        square_size: f64,
    ) -> Result<Self, PatternError> {
        Self::new(
            squares_x.saturating_sub(1),
            squares_y.saturating_sub(1),
            square_size,
        )
    }

    pub fn validate(&self) -> Result<(), PatternError> {
        if self.cols < 2 || self.rows < 2 {
            return Err(PatternError::TooSmall {
                cols: self.cols,
                rows: self.rows,
            });
        }
        if !(self.square_size.is_finite() && self.square_size > 0.0) {
            return Err(PatternError::InvalidSquareSize(self.square_size));
        }
        Ok(())
    }

    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Board-frame corner coordinates, row-major with x fastest, on `z = 0`.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let s = self.square_size;
        (0..self.rows)
            .flat_map(|j| (0..self.cols).map(move |i| Point3::new(i as f64 * s, j as f64 * s, 0.0)))
            .collect()
    }
}

/// Corners of one image, row-major in pattern order.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedCorners {
    pub cols: u32,
    pub rows: u32,
    pub points: Vec<Point2<f64>>,
}

impl ObservedCorners {
    #[inline]
    pub fn at(&self, i: u32, j: u32) -> Point2<f64> {
        self.points[(j * self.cols + i) as usize]
    }
}

/// Detected corners paired with their board coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct ChessboardObservation {
    /// Source image identifier, typically the file name.
    pub source: String,
    pub image_points: Vec<Point2<f64>>,
    pub object_points: Vec<Point3<f64>>,
}

impl ChessboardObservation {
    pub fn new(
        source: impl Into<String>,
        corners: ObservedCorners,
        pattern: &CalibrationPattern,
    ) -> Result<Self, PatternError> {
        let expected = pattern.corner_count();
        if corners.points.len() != expected {
            return Err(PatternError::CornerCount {
                expected,
                found: corners.points.len(),
            });
        }
        Ok(Self {
            source: source.into(),
            image_points: corners.points,
            object_points: pattern.object_points(),
        })
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}
