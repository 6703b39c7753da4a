//! Discovery of image collections in pools of SEM micrograph metadata.
//!
//! A pass runs in stages, each a small stateless type configured by a
//! params struct:
//!
//! 1. [`ModeClassifier`] turns detector fields into a [`ModeLabel`].
//! 2. [`SceneClusterer`] groups one pool into physical scenes.
//! 3. [`ModeSetBuilder`] and [`PyramidBuilder`] find mode sets and
//!    magnification pyramids within a pool.
//! 4. [`CrossSessionGrouper`] matches comparable acquisitions across pools.
//!
//! [`Discovery`] wires the stages together from a [`DiscoveryConfig`].
//! Pyramids are confirmed by image correlation through a [`PairConfirmer`];
//! [`RegistrarConfirmer`] provides one backed by a
//! [`semgrid_core::PixelSource`].
//!
//! ```
//! use semgrid_core::ImageRecord;
//! use semgrid_discover::{Discovery, SessionPool};
//!
//! let pool = SessionPool::new(
//!     "s1",
//!     vec![
//!         ImageRecord::new("a.tif", 1024, 768)
//!             .with_center(100.0, 200.0)
//!             .with_field_of_view(50.0, 50.0)
//!             .with_detector("SED", 15.0),
//!         ImageRecord::new("b.tif", 1024, 768)
//!             .with_center(100.0, 200.0)
//!             .with_field_of_view(50.0, 50.0)
//!             .with_detector("BSD", 15.0),
//!     ],
//! );
//! let report = Discovery::default().run(&[pool], None);
//! assert_eq!(report.sessions[0].clusters.len(), 1);
//! assert_eq!(report.collections[0].id, "mode_grid_100_200");
//! ```

mod cluster;
mod collection;
mod compare;
mod discovery;
mod io;
mod mode;
mod mode_set;
mod pyramid;

pub use cluster::{ClusterParams, ClusterStrategy, SceneCluster, SceneClusterer};
pub use collection::{
    Collection, CollectionEntry, CollectionError, CollectionKind, Provenance, VaryingParameters,
};
pub use compare::{
    band_magnifications, representative_magnification, CompareParams, CrossSessionGrouper,
    SessionPool,
};
pub use discovery::Discovery;
pub use io::{
    load_records, write_records, DiscoverIoError, DiscoveryConfig, DiscoveryReport, PoolSpec,
    SessionSummary,
};
pub use mode::{preferred_rank, DetectorMode, Labeled, MixStrategy, ModeClassifier, ModeLabel};
pub use mode_set::{ModeSetBuilder, ModeSetParams};
pub use pyramid::{PairConfirmer, PyramidBuilder, PyramidParams, RegistrarConfirmer};
