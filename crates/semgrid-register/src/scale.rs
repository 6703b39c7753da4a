//! Probe scale from physical metadata.

use semgrid_core::{GeometryError, ImageRecord};
use serde::{Deserialize, Serialize};

use crate::RegisterError;

/// Which metadata produced a [`ProbeScale`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSource {
    PixelSize,
    FieldOfView,
    Magnification,
}

/// Per-axis factor that brings the probe to the search image's pixel size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeScale {
    pub x: f64,
    pub y: f64,
    pub source: ScaleSource,
}

/// Ratio of probe to search pixel size, falling back from explicit pixel
/// sizes to field of view to magnification.
///
/// Fails with [`RegisterError::ScaleOutOfRange`] when either axis leaves
/// `[min, max]`; that signals bad metadata and is never clamped.
pub fn probe_scale(
    search: &ImageRecord,
    probe: &ImageRecord,
    min: f64,
    max: f64,
) -> Result<ProbeScale, RegisterError> {
    let scale = estimate(search, probe)?;
    for s in [scale.x, scale.y] {
        if !(s.is_finite() && s >= min && s <= max) {
            return Err(RegisterError::ScaleOutOfRange { scale: s, min, max });
        }
    }
    Ok(scale)
}

fn estimate(search: &ImageRecord, probe: &ImageRecord) -> Result<ProbeScale, GeometryError> {
    if let (Some(s), Some(p)) = (search.pixel_size, probe.pixel_size) {
        let (s, p) = (s.validated()?, p.validated()?);
        return Ok(ProbeScale {
            x: p.x_um / s.x_um,
            y: p.y_um / s.y_um,
            source: ScaleSource::PixelSize,
        });
    }
    // Pixels are square; heights may include a data bar, so x sets both axes.
    if let (Ok(s), Ok(p)) = (search.fov(), probe.fov()) {
        let ratio = (p.width_um / probe.width_px as f64) / (s.width_um / search.width_px as f64);
        return Ok(ProbeScale {
            x: ratio,
            y: ratio,
            source: ScaleSource::FieldOfView,
        });
    }
    // Frame width is set by magnification alone, whatever the pixel count.
    let ratio = search.magnification()? / probe.magnification()? * search.width_px as f64
        / probe.width_px as f64;
    Ok(ProbeScale {
        x: ratio,
        y: ratio,
        source: ScaleSource::Magnification,
    })
}
