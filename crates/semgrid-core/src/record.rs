//! Flat per-image metadata record.
//!
//! Records are plain serializable data supplied by a metadata reader. Any
//! physical field may be absent; accessors report absence as
//! [`GeometryError::Undetermined`] and never substitute zero.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::{CoordinateFrame, FieldOfView, GeometryError, PixelSize, StageRotation};

/// File-name marker of derived chemical overlay products.
pub const OVERLAY_MARKER: &str = "ChemiSEM";

/// Stage position of an image center, micrometers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    pub x_um: f64,
    pub y_um: f64,
}

impl StagePosition {
    pub fn new(x_um: f64, y_um: f64) -> Self {
        Self { x_um, y_um }
    }

    pub fn point(&self) -> Point2<f64> {
        Point2::new(self.x_um, self.y_um)
    }
}

/// Raw detector configuration fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Detector name as reported by the instrument (`SED`, `BSD`, `MIX`, ...).
    pub name: Option<String>,
    /// Segment weights `[A, B, C, D]` of a mixed backscatter configuration.
    pub mix_factors: Option<[f64; 4]>,
    pub high_voltage_kv: Option<f64>,
    pub emission_current_ua: Option<f64>,
    pub integrations: Option<u32>,
}

/// Metadata for one micrograph.
///
/// The pixel buffer is not part of the record; it is looked up by `id`
/// through a [`crate::PixelSource`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Path or handle identifying the image.
    pub id: String,
    pub width_px: usize,
    pub height_px: usize,
    #[serde(default)]
    pub pixel_size: Option<PixelSize>,
    #[serde(default)]
    pub center: Option<StagePosition>,
    #[serde(default)]
    pub field_of_view: Option<FieldOfView>,
    #[serde(default)]
    pub rotation: StageRotation,
    #[serde(default)]
    pub magnification: Option<f64>,
    #[serde(default)]
    pub working_distance_mm: Option<f64>,
    #[serde(default)]
    pub detector: DetectorSettings,
    /// Operator-assigned grouping tag; equal tags always share a scene.
    #[serde(default)]
    pub collection_tag: Option<String>,
    /// Explicitly marks a derived chemical overlay product.
    #[serde(default)]
    pub derived_overlay: bool,
}

impl ImageRecord {
    pub fn new(id: impl Into<String>, width_px: usize, height_px: usize) -> Self {
        Self {
            id: id.into(),
            width_px,
            height_px,
            pixel_size: None,
            center: None,
            field_of_view: None,
            rotation: StageRotation::default(),
            magnification: None,
            working_distance_mm: None,
            detector: DetectorSettings::default(),
            collection_tag: None,
            derived_overlay: false,
        }
    }

    pub fn with_center(mut self, x_um: f64, y_um: f64) -> Self {
        self.center = Some(StagePosition::new(x_um, y_um));
        self
    }

    pub fn with_field_of_view(mut self, width_um: f64, height_um: f64) -> Self {
        self.field_of_view = Some(FieldOfView::new(width_um, height_um));
        self
    }

    pub fn with_pixel_size(mut self, size: PixelSize) -> Self {
        self.pixel_size = Some(size);
        self
    }

    pub fn with_rotation(mut self, rotation: StageRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_magnification(mut self, mag: f64) -> Self {
        self.magnification = Some(mag);
        self
    }

    pub fn with_working_distance(mut self, mm: f64) -> Self {
        self.working_distance_mm = Some(mm);
        self
    }

    pub fn with_detector(mut self, name: impl Into<String>, high_voltage_kv: f64) -> Self {
        self.detector.name = Some(name.into());
        self.detector.high_voltage_kv = Some(high_voltage_kv);
        self
    }

    pub fn with_mix_factors(mut self, factors: [f64; 4]) -> Self {
        self.detector.mix_factors = Some(factors);
        self
    }

    pub fn with_collection_tag(mut self, tag: impl Into<String>) -> Self {
        self.collection_tag = Some(tag.into());
        self
    }

    pub fn as_overlay(mut self) -> Self {
        self.derived_overlay = true;
        self
    }

    /// Last path component of `id`.
    pub fn file_name(&self) -> &str {
        self.id.rsplit(['/', '\\']).next().unwrap_or(&self.id)
    }

    /// Whether this is a derived chemical overlay rather than a detector reading.
    pub fn is_overlay(&self) -> bool {
        self.derived_overlay || self.file_name().contains(OVERLAY_MARKER)
    }

    /// File name with the overlay marker and any `.tif`/`.tiff` extension removed.
    ///
    /// An overlay and the primary image it was derived from share a base name.
    pub fn base_name(&self) -> String {
        let name = self.file_name().replace(&format!("_{OVERLAY_MARKER}"), "");
        let lower = name.to_ascii_lowercase();
        for ext in [".tiff", ".tif"] {
            if lower.ends_with(ext) {
                return name[..name.len() - ext.len()].to_string();
            }
        }
        name
    }

    pub fn center_um(&self) -> Result<Point2<f64>, GeometryError> {
        match self.center {
            Some(c) if c.x_um.is_finite() && c.y_um.is_finite() => Ok(c.point()),
            _ => Err(GeometryError::missing("center")),
        }
    }

    /// Explicit field of view, or pixel size times pixel dimensions.
    pub fn fov(&self) -> Result<FieldOfView, GeometryError> {
        if let Some(fov) = self.field_of_view {
            return fov.validated();
        }
        let px = self
            .pixel_size
            .ok_or(GeometryError::missing("field_of_view"))?
            .validated()?;
        FieldOfView::new(
            px.x_um * self.width_px as f64,
            px.y_um * self.height_px as f64,
        )
        .validated()
    }

    /// Explicit pixel size, or field of view divided by pixel dimensions.
    pub fn um_per_pixel(&self) -> Result<PixelSize, GeometryError> {
        if let Some(px) = self.pixel_size {
            return px.validated();
        }
        let fov = self
            .field_of_view
            .ok_or(GeometryError::missing("pixel_size"))?
            .validated()?;
        if self.width_px == 0 || self.height_px == 0 {
            return Err(GeometryError::missing("pixel_size"));
        }
        PixelSize {
            x_um: fov.width_um / self.width_px as f64,
            y_um: fov.height_um / self.height_px as f64,
        }
        .validated()
    }

    pub fn magnification(&self) -> Result<f64, GeometryError> {
        match self.magnification {
            Some(m) if m.is_finite() && m > 0.0 => Ok(m),
            _ => Err(GeometryError::missing("magnification")),
        }
    }

    /// Center and field of view together; registration needs both.
    pub fn footprint(&self) -> Result<(Point2<f64>, FieldOfView), GeometryError> {
        Ok((self.center_um()?, self.fov()?))
    }

    /// The pixel frame of this image anchored at its stage center.
    pub fn frame(&self) -> Result<CoordinateFrame, GeometryError> {
        CoordinateFrame::new(self.center_um()?, self.um_per_pixel()?, self.rotation)
    }

    /// Whether every field needed by collection discovery is present.
    pub fn is_complete(&self) -> bool {
        self.detector.name.is_some()
            && self.detector.high_voltage_kv.is_some()
            && self.magnification().is_ok()
            && self.footprint().is_ok()
    }
}
