//! Stage ↔ pixel coordinate conversion and physical containment.
//!
//! Stage coordinates are micrometers with the origin at the stage center.
//! Relative to an image's pixel grid, physical X grows to the **left**
//! (opposite to pixel X) and physical Y grows **up** (opposite to pixel Y).
//! A stage rotation of `degrees * sense` is applied to the physical offset
//! before that axis flip.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::GeometryError;

/// Physical size of one pixel in micrometers, per axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub x_um: f64,
    pub y_um: f64,
}

impl PixelSize {
    pub fn isotropic(um: f64) -> Self {
        Self { x_um: um, y_um: um }
    }

    /// Reject zero, negative or non-finite sizes as undetermined.
    pub fn validated(self) -> Result<Self, GeometryError> {
        if usable(self.x_um) && usable(self.y_um) {
            Ok(self)
        } else {
            Err(GeometryError::missing("pixel_size"))
        }
    }
}

/// Physical extent of one image frame in micrometers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub width_um: f64,
    pub height_um: f64,
}

impl FieldOfView {
    pub fn new(width_um: f64, height_um: f64) -> Self {
        Self {
            width_um,
            height_um,
        }
    }

    pub fn validated(self) -> Result<Self, GeometryError> {
        if usable(self.width_um) && usable(self.height_um) {
            Ok(self)
        } else {
            Err(GeometryError::missing("field_of_view"))
        }
    }
}

/// Direction in which positive stage rotation angles turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationSense {
    #[default]
    Counterclockwise,
    Clockwise,
}

impl RotationSense {
    pub fn sign(self) -> f64 {
        match self {
            RotationSense::Counterclockwise => 1.0,
            RotationSense::Clockwise => -1.0,
        }
    }
}

/// Signed stage rotation together with its direction convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageRotation {
    pub degrees: f64,
    pub sense: RotationSense,
}

impl StageRotation {
    pub fn new(degrees: f64, sense: RotationSense) -> Self {
        Self { degrees, sense }
    }

    /// `degrees * sign`, the angle actually applied to offsets.
    pub fn effective_degrees(&self) -> f64 {
        self.degrees * self.sense.sign()
    }

    pub fn is_zero(&self) -> bool {
        self.degrees.rem_euclid(360.0) == 0.0
    }
}

/// The pixel frame of one image anchored at a physical center.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateFrame {
    pub center_um: Point2<f64>,
    pub pixel_size: PixelSize,
    pub rotation: StageRotation,
}

impl CoordinateFrame {
    pub fn new(
        center_um: Point2<f64>,
        pixel_size: PixelSize,
        rotation: StageRotation,
    ) -> Result<Self, GeometryError> {
        if !(center_um.x.is_finite() && center_um.y.is_finite()) {
            return Err(GeometryError::missing("center"));
        }
        Ok(Self {
            center_um,
            pixel_size: pixel_size.validated()?,
            rotation,
        })
    }

    /// Offset of `target_um` from the frame center, in this frame's pixels.
    pub fn to_pixels(&self, target_um: Point2<f64>) -> Vector2<f64> {
        let d = target_um - self.center_um;
        let (s, c) = self.rotation.effective_degrees().to_radians().sin_cos();
        let rdx = d.x * c + d.y * s;
        let rdy = -d.x * s + d.y * c;
        Vector2::new(-rdx / self.pixel_size.x_um, -rdy / self.pixel_size.y_um)
    }

    /// Inverse of [`CoordinateFrame::to_pixels`].
    pub fn from_pixels(&self, offset_px: Vector2<f64>) -> Point2<f64> {
        let rdx = -offset_px.x * self.pixel_size.x_um;
        let rdy = -offset_px.y * self.pixel_size.y_um;
        let (s, c) = self.rotation.effective_degrees().to_radians().sin_cos();
        self.center_um + Vector2::new(rdx * c - rdy * s, rdx * s + rdy * c)
    }
}

/// Pixel offset of `target_um` relative to `center_um` in the center image's axes.
///
/// Returns [`GeometryError::Undetermined`] when a pixel size is zero,
/// negative or non-finite.
pub fn to_pixels(
    center_um: Point2<f64>,
    target_um: Point2<f64>,
    um_per_px_x: f64,
    um_per_px_y: f64,
    rotation_deg: f64,
    sense: RotationSense,
) -> Result<Vector2<f64>, GeometryError> {
    let frame = CoordinateFrame::new(
        center_um,
        PixelSize {
            x_um: um_per_px_x,
            y_um: um_per_px_y,
        },
        StageRotation::new(rotation_deg, sense),
    )?;
    Ok(frame.to_pixels(target_um))
}

/// Whether the inner physical rectangle lies entirely within the outer one.
///
/// Both rectangles are axis-aligned in the unrotated stage frame.
pub fn contains(
    outer_center_um: Point2<f64>,
    outer_fov: FieldOfView,
    inner_center_um: Point2<f64>,
    inner_fov: FieldOfView,
) -> bool {
    let (ohw, ohh) = (outer_fov.width_um / 2.0, outer_fov.height_um / 2.0);
    let (ihw, ihh) = (inner_fov.width_um / 2.0, inner_fov.height_um / 2.0);
    inner_center_um.x - ihw >= outer_center_um.x - ohw
        && inner_center_um.x + ihw <= outer_center_um.x + ohw
        && inner_center_um.y - ihh >= outer_center_um.y - ohh
        && inner_center_um.y + ihh <= outer_center_um.y + ohh
}

/// Rotate `p` by `angle_deg` about `center` using the standard matrix
/// `[[cos, -sin], [sin, cos]]` on the coordinates as given.
pub fn rotate_point(p: Point2<f64>, center: Point2<f64>, angle_deg: f64) -> Point2<f64> {
    let (s, c) = angle_deg.to_radians().sin_cos();
    let d = p - center;
    center + Vector2::new(d.x * c - d.y * s, d.x * s + d.y * c)
}

fn usable(v: f64) -> bool {
    v.is_finite() && v > 0.0
}
