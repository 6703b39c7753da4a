//! Core types for SEM micrograph registration and collection discovery.
//!
//! This crate is purely geometric and does no I/O. It holds:
//! - [`ImageRecord`], the flat metadata record of one micrograph,
//! - [`CoordinateFrame`] stage ↔ pixel math and [`contains`],
//! - lightweight [`GrayImage`]/[`GrayImageView`] buffers with the resampling
//!   used before template matching,
//! - [`PixelSource`], the seam through which callers lend decoded pixels.

mod error;
mod frame;
mod image;
mod logger;
mod record;

pub use error::{GeometryError, ImageError};
pub use frame::{
    contains, rotate_point, to_pixels, CoordinateFrame, FieldOfView, PixelSize, RotationSense,
    StageRotation,
};
pub use image::{
    resize, rotate_about_center, sample_bilinear, GrayImage, GrayImageView, PixelSource,
};
pub use record::{DetectorSettings, ImageRecord, StagePosition, OVERLAY_MARKER};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
