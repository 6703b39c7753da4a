//! Grayscale buffers and the resampling primitives used by registration.
//!
//! Pixel centers sit at integer coordinates for sampling; geometric code that
//! works in continuous image coordinates (rotation about the image center)
//! places pixel `(x, y)` at `(x + 0.5, y + 0.5)`.

use std::collections::{BTreeMap, HashMap};

use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::frame::rotate_point;
use crate::ImageError;

/// Borrowed row-major 8-bit grayscale buffer.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

/// Owned row-major 8-bit grayscale buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl<'a> GrayImageView<'a> {
    /// Wrap a raw buffer, validating its length against the dimensions.
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Result<Self, ImageError> {
        check_dims(width, height, data.len())?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &'a [u8] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copy a rectangular region into a new image.
    pub fn crop(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<GrayImage, ImageError> {
        if x + width > self.width || y + height > self.height {
            return Err(ImageError::CropOutOfBounds {
                x,
                y,
                width,
                height,
                image_width: self.width,
                image_height: self.height,
            });
        }
        let mut data = Vec::with_capacity(width * height);
        for row in y..y + height {
            data.extend_from_slice(&self.row(row)[x..x + width]);
        }
        Ok(GrayImage {
            width,
            height,
            data,
        })
    }

    pub fn to_owned(&self) -> GrayImage {
        GrayImage {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }
}

impl GrayImage {
    /// Image filled with a constant value.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ImageError> {
        check_dims(width, height, data.len())?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

fn check_dims(width: usize, height: usize, len: usize) -> Result<(), ImageError> {
    let expected = width * height;
    if expected == 0 {
        return Err(ImageError::Empty { width, height });
    }
    if len != expected {
        return Err(ImageError::BufferSize { expected, got: len });
    }
    Ok(())
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

/// Bilinear sample with pixel centers at integer coordinates; outside is 0.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Per-output-index source taps along one axis.
///
/// Shrinking integrates the covered source interval (area averaging), which
/// is what a detector with larger pixels would have recorded. Enlarging falls
/// back to linear interpolation between the two nearest source centers.
fn axis_taps(src_len: usize, dst_len: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len - 1;
    (0..dst_len)
        .map(|o| {
            if scale >= 1.0 {
                let start = o as f64 * scale;
                let end = (o as f64 + 1.0) * scale;
                let first = start.floor() as usize;
                let stop = (end.ceil() as usize).min(src_len);
                (first..stop)
                    .filter_map(|i| {
                        let overlap = end.min(i as f64 + 1.0) - start.max(i as f64);
                        (overlap > 1e-12).then(|| (i, (overlap / scale) as f32))
                    })
                    .collect()
            } else {
                let s = ((o as f64 + 0.5) * scale - 0.5).clamp(0.0, last as f64);
                let i0 = s.floor() as usize;
                let i1 = (i0 + 1).min(last);
                let f = (s - i0 as f64) as f32;
                vec![(i0, 1.0 - f), (i1, f)]
            }
        })
        .collect()
}

/// Resample to an explicit size (area averaging when shrinking).
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src), fields(w = src.width, h = src.height))
)]
///
/// Fails with [`ImageError::Empty`] when the source or the target has no
/// pixels, and with [`ImageError::BufferSize`] on a malformed view.
pub fn resize(
    src: &GrayImageView<'_>,
    width: usize,
    height: usize,
) -> Result<GrayImage, ImageError> {
    check_dims(src.width, src.height, src.data.len())?;
    if width == 0 || height == 0 {
        return Err(ImageError::Empty { width, height });
    }
    if width == src.width && height == src.height {
        return Ok(src.to_owned());
    }
    let xs = axis_taps(src.width, width);
    let ys = axis_taps(src.height, height);

    let mut horiz = vec![0.0f32; width * src.height];
    for y in 0..src.height {
        let row = src.row(y);
        let out = &mut horiz[y * width..(y + 1) * width];
        for (o, taps) in xs.iter().enumerate() {
            out[o] = taps.iter().map(|&(i, w)| row[i] as f32 * w).sum();
        }
    }

    let mut data = vec![0u8; width * height];
    for (oy, taps) in ys.iter().enumerate() {
        let out = &mut data[oy * width..(oy + 1) * width];
        for (ox, px) in out.iter_mut().enumerate() {
            let v: f32 = taps.iter().map(|&(i, w)| horiz[i * width + ox] * w).sum();
            *px = (v + 0.5).clamp(0.0, 255.0) as u8;
        }
    }
    Ok(GrayImage {
        width,
        height,
        data,
    })
}

/// Rotate the content by `angle_deg` about the image center.
///
/// The pixel at continuous position `p` in `src` lands at
/// `rotate_point(p, center, angle_deg)` in the output, which keeps the
/// input size. Output pixels with no source coverage take `fill`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src), fields(w = src.width, h = src.height))
)]
pub fn rotate_about_center(src: &GrayImageView<'_>, angle_deg: f64, fill: u8) -> GrayImage {
    if angle_deg.rem_euclid(360.0) == 0.0 {
        return src.to_owned();
    }
    let center = Point2::new(src.width as f64 / 2.0, src.height as f64 / 2.0);
    let max_x = src.width as f64 - 0.5;
    let max_y = src.height as f64 - 0.5;
    GrayImage::from_fn(src.width, src.height, |x, y| {
        let q = Point2::new(x as f64 + 0.5, y as f64 + 0.5);
        let p = rotate_point(q, center, -angle_deg);
        if p.x < 0.0 || p.y < 0.0 || p.x > src.width as f64 || p.y > src.height as f64 {
            return fill;
        }
        let sx = (p.x - 0.5).clamp(0.0, max_x - 0.5);
        let sy = (p.y - 0.5).clamp(0.0, max_y - 0.5);
        sample_bilinear(src, sx as f32, sy as f32)
            .round()
            .clamp(0.0, 255.0) as u8
    })
}

/// Read-only access to decoded pixels by record identifier.
///
/// Decoding is a collaborator's job; the core only borrows buffers.
pub trait PixelSource {
    fn pixels(&self, id: &str) -> Option<GrayImageView<'_>>;
}

impl PixelSource for HashMap<String, GrayImage> {
    fn pixels(&self, id: &str) -> Option<GrayImageView<'_>> {
        self.get(id).map(GrayImage::view)
    }
}

impl PixelSource for BTreeMap<String, GrayImage> {
    fn pixels(&self, id: &str) -> Option<GrayImageView<'_>> {
        self.get(id).map(GrayImage::view)
    }
}
