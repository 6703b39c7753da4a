/// Physical metadata needed for a geometric operation is absent or unusable.
///
/// This is the "undetermined" outcome: callers skip the affected record or
/// pair instead of guessing a value.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("undetermined geometry: {field} is missing, zero or non-finite")]
    Undetermined { field: &'static str },
}

impl GeometryError {
    pub(crate) fn missing(field: &'static str) -> Self {
        Self::Undetermined { field }
    }
}

/// Errors produced when building or slicing grayscale buffers.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid grayscale buffer length (expected {expected} bytes, got {got})")]
    BufferSize { expected: usize, got: usize },

    #[error("empty image ({width}x{height})")]
    Empty { width: usize, height: usize },

    #[error("crop {width}x{height} at ({x}, {y}) exceeds image {image_width}x{image_height}")]
    CropOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        image_width: usize,
        image_height: usize,
    },
}
