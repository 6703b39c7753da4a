//! Registration of one image's content inside another.

use log::{debug, warn};
use nalgebra::Point2;
use semgrid_core::{
    resize, rotate_about_center, rotate_point, GrayImage, GrayImageView, ImageRecord,
    PixelSource,
};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    probe_scale, Alignment, ConsistencyCheck, MatchPeak, Placement, ProbeScale, RegisterError,
    RegistrarParams, TemplateMatch, TemplateMatcher,
};

/// Places images inside each other using metadata and correlation.
///
/// Holds only parameters; every call receives the records and borrowed
/// pixels it works on.
#[derive(Clone, Debug, Default)]
pub struct Registrar {
    params: RegistrarParams,
    matcher: TemplateMatcher,
}

impl Registrar {
    pub fn new(params: RegistrarParams) -> Self {
        let matcher = TemplateMatcher::new(params.matcher.clone());
        Self { params, matcher }
    }

    pub fn params(&self) -> &RegistrarParams {
        &self.params
    }

    /// Locate `probe` inside `search` at the metadata-derived relative scale.
    ///
    /// The returned alignment may have any confidence; applying an
    /// acceptance threshold is up to the caller.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(search = %search.id, probe = %probe.id))
    )]
    pub fn register(
        &self,
        search: &ImageRecord,
        search_px: &GrayImageView<'_>,
        probe: &ImageRecord,
        probe_px: &GrayImageView<'_>,
    ) -> Result<Alignment, RegisterError> {
        let scale = probe_scale(search, probe, self.params.min_scale, self.params.max_scale)?;
        let scaled = self.prepare_probe(probe_px, scale)?;
        let found = self.matcher.match_template(search_px, &scaled.view())?;
        debug!(
            "{} in {}: ({}, {}) confidence {:.3}",
            probe.id,
            search.id,
            found.best.x,
            found.best.y,
            found.confidence()
        );
        Ok(alignment_of(&found.best, &found, scale))
    }

    /// Place a detail image on an overview.
    ///
    /// The overview is de-rotated by its effective stage rotation before
    /// matching, so `alignment` is in the de-rotated frame; `center_px`
    /// maps the match back onto the overview as acquired. When the metadata
    /// allows it the placement also carries the predicted center and the
    /// consistency check between the two.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(overview = %overview.id, detail = %detail.id))
    )]
    pub fn place_on_overview(
        &self,
        overview: &ImageRecord,
        overview_px: &GrayImageView<'_>,
        detail: &ImageRecord,
        detail_px: &GrayImageView<'_>,
    ) -> Result<Placement, RegisterError> {
        let scale = probe_scale(overview, detail, self.params.min_scale, self.params.max_scale)?;
        let scaled = self.prepare_probe(detail_px, scale)?;

        let angle = overview.rotation.effective_degrees();
        let derotated: Option<GrayImage> = (!overview.rotation.is_zero())
            .then(|| rotate_about_center(overview_px, angle, self.params.derotate_fill));
        let search = derotated.as_ref().map_or(*overview_px, GrayImage::view);

        let found = self.matcher.match_template(&search, &scaled.view())?;
        let alignment = alignment_of(&found.best, &found, scale);
        let secondary = found
            .secondary
            .iter()
            .map(|peak| alignment_of(peak, &found, scale))
            .collect();

        let image_center = Point2::new(
            overview_px.width as f64 / 2.0,
            overview_px.height as f64 / 2.0,
        );
        let center_px = rotate_point(alignment.center(), image_center, -angle);

        let predicted_px = match self.predict_center(overview, detail) {
            Ok(p) => Some(p),
            Err(err) => {
                debug!("no metadata prediction for {}: {err}", detail.id);
                None
            }
        };
        let consistency = predicted_px.map(|p| self.cross_check(p, center_px));
        if let Some(check) = consistency.filter(|c| !c.consistent) {
            warn!(
                "{} on {}: image match is {:.1} px from the metadata prediction",
                detail.id, overview.id, check.distance_px
            );
        }

        Ok(Placement {
            detail_id: detail.id.clone(),
            alignment,
            center_px,
            secondary,
            predicted_px,
            consistency,
        })
    }

    /// Metadata-only position of the detail's center on the overview as acquired.
    pub fn predict_center(
        &self,
        overview: &ImageRecord,
        detail: &ImageRecord,
    ) -> Result<Point2<f64>, RegisterError> {
        let frame = overview.frame()?;
        let offset = frame.to_pixels(detail.center_um()?);
        Ok(Point2::new(
            overview.width_px as f64 / 2.0 + offset.x,
            overview.height_px as f64 / 2.0 + offset.y,
        ))
    }

    /// Compare a predicted and a matched position against the configured threshold.
    pub fn cross_check(&self, predicted: Point2<f64>, matched: Point2<f64>) -> ConsistencyCheck {
        ConsistencyCheck::new(predicted, matched, self.params.consistency_threshold_px)
    }

    /// Place many details on one overview.
    ///
    /// Pairs are independent; with the `rayon` feature they run in parallel.
    /// Results keep the order of `details`, and one failure never stops the
    /// rest.
    pub fn place_all<S>(
        &self,
        overview: &ImageRecord,
        details: &[ImageRecord],
        pixels: &S,
    ) -> Vec<Result<Placement, RegisterError>>
    where
        S: PixelSource + Sync + ?Sized,
    {
        let Some(overview_px) = pixels.pixels(&overview.id) else {
            return details
                .iter()
                .map(|_| {
                    Err(RegisterError::MissingPixels {
                        id: overview.id.clone(),
                    })
                })
                .collect();
        };

        let place_one = |detail: &ImageRecord| {
            let detail_px = pixels
                .pixels(&detail.id)
                .ok_or_else(|| RegisterError::MissingPixels {
                    id: detail.id.clone(),
                })?;
            self.place_on_overview(overview, &overview_px, detail, &detail_px)
        };

        #[cfg(feature = "rayon")]
        let results: Vec<_> = details.par_iter().map(place_one).collect();
        #[cfg(not(feature = "rayon"))]
        let results: Vec<_> = details.iter().map(place_one).collect();
        results
    }

    fn prepare_probe(
        &self,
        probe_px: &GrayImageView<'_>,
        scale: ProbeScale,
    ) -> Result<GrayImage, RegisterError> {
        let cropped = match self.params.overlay_band {
            Some(band) if band.applies_to(probe_px.width, probe_px.height) => {
                Some(probe_px.crop(0, 0, band.width, band.height)?)
            }
            _ => None,
        };
        let src = cropped.as_ref().map_or(*probe_px, GrayImage::view);
        let w = ((src.width as f64 * scale.x).round() as usize).max(1);
        let h = ((src.height as f64 * scale.y).round() as usize).max(1);
        Ok(resize(&src, w, h)?)
    }
}

fn alignment_of(peak: &MatchPeak, found: &TemplateMatch, scale: ProbeScale) -> Alignment {
    Alignment {
        x: peak.x,
        y: peak.y,
        width: found.probe_width,
        height: found.probe_height,
        confidence: peak.confidence(),
        scale_x: scale.x,
        scale_y: scale.y,
    }
}
