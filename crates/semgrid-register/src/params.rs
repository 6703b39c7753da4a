use serde::{Deserialize, Serialize};

use crate::MatchParams;

/// Fixed-size region of a detail image that holds actual image content.
///
/// Some instruments append a data bar below the frame. When a detail is
/// taller than `height` and at least `width` wide, only the top-left
/// `width x height` region is matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayBand {
    pub width: usize,
    pub height: usize,
}

impl Default for OverlayBand {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl OverlayBand {
    pub fn applies_to(&self, width: usize, height: usize) -> bool {
        height > self.height && width >= self.width
    }
}

/// Configuration for the [`crate::Registrar`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarParams {
    pub matcher: MatchParams,
    /// Smallest accepted probe scale factor.
    pub min_scale: f64,
    /// Largest accepted probe scale factor.
    pub max_scale: f64,
    /// Instrument overlay crop; `None` disables cropping.
    pub overlay_band: Option<OverlayBand>,
    /// Pixel distance above which a metadata prediction and an image match
    /// are reported as inconsistent.
    pub consistency_threshold_px: f64,
    /// Fill value for overview pixels uncovered by de-rotation.
    pub derotate_fill: u8,
}

impl Default for RegistrarParams {
    fn default() -> Self {
        Self {
            matcher: MatchParams::default(),
            min_scale: 0.01,
            max_scale: 0.9,
            overlay_band: Some(OverlayBand::default()),
            consistency_threshold_px: 100.0,
            derotate_fill: 255,
        }
    }
}
