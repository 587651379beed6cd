#[derive(thiserror::Error, Debug)]
pub enum CloudError {
    #[error("{what} has {found} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("color image is {found_width}x{found_height}, disparity map is {width}x{height}")]
    ImageDimensionMismatch {
        width: u32,
        height: u32,
        found_width: u32,
        found_height: u32,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
