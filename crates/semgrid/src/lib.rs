//! High-level facade crate for the `semgrid-*` workspace.
//!
//! This crate provides:
//! - stable re-exports of the geometry, registration and discovery crates
//! - (feature-gated) helpers that decode image files with `image` and run
//!   registration and discovery on them
//!
//! ## Quickstart
//!
//! ```no_run
//! use semgrid::discover::{DiscoveryConfig, Discovery};
//! use semgrid::images;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = DiscoveryConfig::load_json("run.json")?;
//! let pools = cfg.load_pools(Path::new("."))?;
//! let report = images::discover_with_images(&Discovery::from_config(&cfg), &pools, Path::new("."));
//! report.write_json(cfg.output_path())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `semgrid::core`: image records, stage/pixel geometry, gray buffers.
//! - `semgrid::register`: template matching and overview placement.
//! - `semgrid::discover`: scene clustering and collection discovery.
//! - `semgrid::images` (feature `image`): file decoding and an image-backed
//!   [`core::PixelSource`].

pub use semgrid_core as core;
pub use semgrid_discover as discover;
pub use semgrid_register as register;

pub use semgrid_core::{CoordinateFrame, ImageRecord};
pub use semgrid_discover::{Collection, CollectionKind, Discovery, DiscoveryReport};
pub use semgrid_register::{Alignment, Placement, Registrar};

#[cfg(feature = "image")]
pub mod images;
