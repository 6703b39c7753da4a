use semgrid_core::{GeometryError, ImageError};

/// Errors returned by the matcher and the registrar.
///
/// A weak match is not an error: it comes back as an [`crate::Alignment`]
/// with a low confidence.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegisterError {
    #[error(transparent)]
    UndeterminedGeometry(#[from] GeometryError),

    #[error("probe scale {scale:.4} outside the matchable range [{min}, {max}]")]
    ScaleOutOfRange { scale: f64, min: f64, max: f64 },

    #[error(
        "probe {probe_width}x{probe_height} does not fit in search image {search_width}x{search_height}"
    )]
    ProbeLargerThanSearch {
        probe_width: usize,
        probe_height: usize,
        search_width: usize,
        search_height: usize,
    },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("no pixels available for {id}")]
    MissingPixels { id: String },
}
