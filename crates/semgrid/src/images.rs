use crate::{core, discover, register};
use log::warn;
use std::collections::HashMap;
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced while decoding image files.
#[derive(thiserror::Error, Debug)]
pub enum ImageLoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] ::image::ImageError),
}

/// Convert an `image::GrayImage` into the lightweight `semgrid-core` view type.
pub fn gray_view(img: &::image::GrayImage) -> core::GrayImageView<'_> {
    core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Decode any supported file into an owned 8-bit grayscale buffer.
pub fn load_gray(path: impl AsRef<Path>) -> Result<core::GrayImage, ImageLoadError> {
    let img = ::image::ImageReader::open(path)?.decode()?.to_luma8();
    Ok(gray_view(&img).to_owned())
}

/// Decoded pixels keyed by record id.
#[derive(Clone, Debug, Default)]
pub struct ImageStore {
    images: HashMap<String, core::GrayImage>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, image: core::GrayImage) {
        self.images.insert(id.into(), image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Decode the file behind every record, resolving ids against `root`.
    ///
    /// Unreadable files are logged and left out; the records can still take
    /// part in metadata-only work.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(records = records.len()))
    )]
    pub fn load(root: &Path, records: &[core::ImageRecord]) -> Self {
        let mut store = Self::new();
        for record in records {
            match load_gray(root.join(&record.id)) {
                Ok(img) => store.insert(record.id.clone(), img),
                Err(err) => warn!("cannot read pixels of {}: {err}", record.id),
            }
        }
        store
    }
}

impl core::PixelSource for ImageStore {
    fn pixels(&self, id: &str) -> Option<core::GrayImageView<'_>> {
        self.images.get(id).map(core::GrayImage::view)
    }
}

/// Run discovery with pyramids confirmed on decoded pixels.
///
/// Each pool's images are decoded once. Pairs whose pixels are missing fail
/// confirmation and are skipped like any other unconfirmed pair.
pub fn discover_with_images(
    discovery: &discover::Discovery,
    pools: &[discover::SessionPool],
    root: &Path,
) -> discover::DiscoveryReport {
    let mut store = ImageStore::new();
    if discovery.find_pyramids {
        for pool in pools {
            store.images.extend(ImageStore::load(root, &pool.records).images);
        }
    }
    let confirmer = discover::RegistrarConfirmer::new(discovery.registrar(), &store);
    let confirmer: &(dyn discover::PairConfirmer + Sync) = &confirmer;
    discovery.run(pools, Some(confirmer))
}

/// Place every detail on the overview using pixels decoded from `root`.
pub fn place_files(
    registrar: &register::Registrar,
    overview: &core::ImageRecord,
    details: &[core::ImageRecord],
    root: &Path,
) -> Vec<Result<register::Placement, register::RegisterError>> {
    let mut store = ImageStore::load(root, std::slice::from_ref(overview));
    store.images.extend(ImageStore::load(root, details).images);
    registrar.place_all(overview, details, &store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PixelSource;

    #[test]
    fn png_round_trips_into_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let img = ::image::GrayImage::from_fn(6, 4, |x, y| ::image::Luma([(x * 10 + y) as u8]));
        img.save(dir.path().join("a.png")).unwrap();

        let records = vec![
            core::ImageRecord::new("a.png", 6, 4),
            core::ImageRecord::new("missing.png", 6, 4),
        ];
        let store = ImageStore::load(dir.path(), &records);
        assert_eq!(store.len(), 1);
        let view = store.pixels("a.png").unwrap();
        assert_eq!((view.width, view.height), (6, 4));
        assert_eq!(view.get(3, 2), 32);
        assert!(store.pixels("missing.png").is_none());
    }
}
