#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DisparityError {
    #[error(
        "left image is {left_width}x{left_height} but right image is {right_width}x{right_height}"
    )]
    ImageDimensionMismatch {
        left_width: u32,
        left_height: u32,
        right_width: u32,
        right_height: u32,
    },

    #[error("invalid matcher parameter: {0}")]
    InvalidParameter(String),
}

impl DisparityError {
    pub(crate) fn check_dimensions(left: (u32, u32), right: (u32, u32)) -> Result<(), Self> {
        if left == right {
            return Ok(());
        }
        Err(Self::ImageDimensionMismatch {
            left_width: left.0,
            left_height: left.1,
            right_width: right.0,
            right_height: right.1,
        })
    }
}
