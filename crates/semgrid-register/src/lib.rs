//! Correlation-based registration of SEM micrographs.
//!
//! - [`TemplateMatcher`] runs an exhaustive zero-mean normalized
//!   cross-correlation of a probe over a search image.
//! - [`probe_scale`] derives the probe's rescale factor from pixel size,
//!   field of view or magnification metadata.
//! - [`Registrar`] combines both with stage geometry. It places detail
//!   images on overviews, predicts placements from metadata alone, and
//!   cross-checks the two.
//!
//! ## Quickstart
//!
//! ```no_run
//! use semgrid_core::{GrayImage, ImageRecord};
//! use semgrid_register::{Registrar, RegistrarParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let overview = ImageRecord::new("overview.tif", 640, 480)
//!     .with_center(0.0, 0.0)
//!     .with_field_of_view(3200.0, 2400.0);
//! let detail = ImageRecord::new("detail.tif", 640, 480)
//!     .with_center(-150.0, 80.0)
//!     .with_field_of_view(320.0, 240.0);
//! let overview_px = GrayImage::filled(640, 480, 0);
//! let detail_px = GrayImage::filled(640, 480, 0);
//!
//! let registrar = Registrar::new(RegistrarParams::default());
//! let placement =
//!     registrar.place_on_overview(&overview, &overview_px.view(), &detail, &detail_px.view())?;
//! println!("{:?} {:?}", placement.center_px, placement.band());
//! # Ok(())
//! # }
//! ```

mod error;
mod ncc;
mod params;
mod registrar;
mod result;
mod scale;

pub use error::RegisterError;
pub use ncc::{MatchParams, MatchPeak, ScoreMap, TemplateMatch, TemplateMatcher};
pub use params::{OverlayBand, RegistrarParams};
pub use registrar::Registrar;
pub use result::{Alignment, ConfidenceBand, ConsistencyCheck, Placement};
pub use scale::{probe_scale, ProbeScale, ScaleSource};
