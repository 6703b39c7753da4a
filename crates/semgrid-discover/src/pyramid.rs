//! Magnification pyramids: nested chains of one scene at rising magnification.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use nalgebra::Point2;
use semgrid_core::{contains, FieldOfView, ImageRecord, PixelSource};
use semgrid_register::{Alignment, RegisterError, Registrar};
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Collection, CollectionEntry, CollectionKind, Labeled, ModeClassifier, ModeLabel, Provenance,
};

/// Configuration for [`PyramidBuilder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidParams {
    /// A level must magnify at least this much more than the chain tail.
    pub min_magnification_step: f64,
    /// Minimum match confidence that confirms a level.
    pub match_threshold: f64,
}

impl Default for PyramidParams {
    fn default() -> Self {
        Self {
            min_magnification_step: 1.5,
            match_threshold: 0.5,
        }
    }
}

/// Image-level confirmation that `fine` shows part of `coarse`.
pub trait PairConfirmer {
    fn confirm(&self, coarse: &ImageRecord, fine: &ImageRecord) -> Result<Alignment, RegisterError>;
}

impl<F> PairConfirmer for F
where
    F: Fn(&ImageRecord, &ImageRecord) -> Result<Alignment, RegisterError>,
{
    fn confirm(&self, coarse: &ImageRecord, fine: &ImageRecord) -> Result<Alignment, RegisterError> {
        self(coarse, fine)
    }
}

/// Confirms pairs by correlating pixels lent by a [`PixelSource`].
pub struct RegistrarConfirmer<'a, S: ?Sized> {
    registrar: &'a Registrar,
    pixels: &'a S,
}

impl<'a, S: PixelSource + ?Sized> RegistrarConfirmer<'a, S> {
    pub fn new(registrar: &'a Registrar, pixels: &'a S) -> Self {
        Self { registrar, pixels }
    }
}

impl<S: PixelSource + ?Sized> PairConfirmer for RegistrarConfirmer<'_, S> {
    fn confirm(&self, coarse: &ImageRecord, fine: &ImageRecord) -> Result<Alignment, RegisterError> {
        let missing = |r: &ImageRecord| RegisterError::MissingPixels { id: r.id.clone() };
        let coarse_px = self.pixels.pixels(&coarse.id).ok_or_else(|| missing(coarse))?;
        let fine_px = self.pixels.pixels(&fine.id).ok_or_else(|| missing(fine))?;
        self.registrar.register(coarse, &coarse_px, fine, &fine_px)
    }
}

/// Greedy chain construction over records of one mode and voltage.
///
/// Every record is tried as a chain head. A head's chain only ever grows
/// at its tail, so overlapping chains (a later head that already sat inside
/// an earlier chain) are expected and kept; consumers pick among them.
#[derive(Clone, Debug, Default)]
pub struct PyramidBuilder {
    params: PyramidParams,
}

/// A record with the geometry chain building needs.
struct Level<'a> {
    record: &'a ImageRecord,
    mag: f64,
    center: Point2<f64>,
    fov: FieldOfView,
}

impl PyramidBuilder {
    pub fn new(params: PyramidParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PyramidParams {
        &self.params
    }

    /// Pyramids for a pool, built independently per mode label.
    ///
    /// Records lacking magnification or footprint are skipped. With the
    /// `rayon` feature, mode groups are processed in parallel; chain building
    /// inside a group stays sequential.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(records = records.len()))
    )]
    pub fn build<C>(
        &self,
        records: &[ImageRecord],
        classifier: &ModeClassifier,
        confirmer: &C,
    ) -> Vec<Collection>
    where
        C: PairConfirmer + Sync + ?Sized,
    {
        let mut groups: BTreeMap<String, Vec<Labeled<'_>>> = BTreeMap::new();
        for labeled in Labeled::all(classifier, records) {
            groups
                .entry(labeled.label.key.clone())
                .or_default()
                .push(labeled);
        }

        #[cfg(feature = "rayon")]
        let per_group: Vec<Vec<Collection>> = groups
            .into_par_iter()
            .map(|(_, group)| self.build_group(&group, confirmer))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let per_group: Vec<Vec<Collection>> = groups
            .into_values()
            .map(|group| self.build_group(&group, confirmer))
            .collect();

        let out: Vec<Collection> = per_group.into_iter().flatten().collect();
        info!("found {} magnification pyramid(s)", out.len());
        out
    }

    /// Chains within one mode group; records need not be pre-sorted.
    fn build_group<C>(&self, group: &[Labeled<'_>], confirmer: &C) -> Vec<Collection>
    where
        C: PairConfirmer + ?Sized,
    {
        let Some(first) = group.first() else {
            return Vec::new();
        };
        let label = first.label.clone();

        let mut levels: Vec<Level<'_>> = group
            .iter()
            .filter_map(|l| {
                let r = l.record;
                match (r.magnification(), r.footprint()) {
                    (Ok(mag), Ok((center, fov))) => Some(Level {
                        record: r,
                        mag,
                        center,
                        fov,
                    }),
                    _ => {
                        debug!("skipping {} for pyramids: incomplete geometry", r.id);
                        None
                    }
                }
            })
            .collect();
        levels.sort_by(|a, b| {
            a.mag
                .total_cmp(&b.mag)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });

        // Each (tail, candidate) pair is correlated at most once per group.
        let mut verdicts: HashMap<(usize, usize), Option<Alignment>> = HashMap::new();
        let mut out = Vec::new();
        for head in 0..levels.len() {
            let mut chain: Vec<(usize, Option<Alignment>)> = vec![(head, None)];
            for cand in head + 1..levels.len() {
                let tail = chain[chain.len() - 1].0;
                if !self.nests(&levels[tail], &levels[cand]) {
                    continue;
                }
                let verdict = *verdicts
                    .entry((tail, cand))
                    .or_insert_with(|| self.confirm(confirmer, &levels[tail], &levels[cand]));
                if let Some(alignment) = verdict {
                    chain.push((cand, Some(alignment)));
                }
            }
            if chain.len() >= 2 {
                out.push(self.collection(&label, &levels, &chain));
            }
        }
        out
    }

    /// Magnification step and physical containment of `fine` in `coarse`.
    fn nests(&self, coarse: &Level<'_>, fine: &Level<'_>) -> bool {
        fine.mag >= coarse.mag * self.params.min_magnification_step
            && contains(coarse.center, coarse.fov, fine.center, fine.fov)
    }

    fn confirm<C>(&self, confirmer: &C, coarse: &Level<'_>, fine: &Level<'_>) -> Option<Alignment>
    where
        C: PairConfirmer + ?Sized,
    {
        match confirmer.confirm(coarse.record, fine.record) {
            Ok(a) if a.passes(self.params.match_threshold) => Some(a),
            Ok(a) => {
                debug!(
                    "{} in {}: confidence {:.3} below {}",
                    fine.record.id, coarse.record.id, a.confidence, self.params.match_threshold
                );
                None
            }
            Err(err) => {
                debug!(
                    "{} in {}: not registered: {err}",
                    fine.record.id, coarse.record.id
                );
                None
            }
        }
    }

    fn collection(
        &self,
        label: &ModeLabel,
        levels: &[Level<'_>],
        chain: &[(usize, Option<Alignment>)],
    ) -> Collection {
        let head = &levels[chain[0].0];
        let entries: Vec<CollectionEntry> = chain
            .iter()
            .map(|&(i, alignment)| CollectionEntry {
                alignment,
                ..CollectionEntry::new(levels[i].record.clone(), label.clone())
            })
            .collect();
        let magnifications: Vec<f64> = chain.iter().map(|&(i, _)| levels[i].mag).collect();
        let description = format!(
            "{} pyramid, {} levels from {}x to {}x",
            label.display,
            chain.len(),
            magnifications[0],
            magnifications[magnifications.len() - 1]
        );
        Collection {
            kind: CollectionKind::Pyramid,
            id: format!("mag_grid_{}_{}", label.key, head.record.base_name()),
            entries,
            provenance: Provenance {
                mode: Some(label.mode.clone()),
                voltage_kv: label.voltage_kv,
                magnifications,
                position: head.record.center,
                field_of_view: Some(head.fov),
                description,
                ..Provenance::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn level(id: &str, mag: f64, x: f64, y: f64) -> ImageRecord {
        // 1270 µm frame width at 100x.
        let fov = 127_000.0 / mag;
        ImageRecord::new(id, 64, 64)
            .with_center(x, y)
            .with_field_of_view(fov, fov)
            .with_magnification(mag)
            .with_detector("BSD", 15.0)
    }

    fn accept_all(_: &ImageRecord, _: &ImageRecord) -> Result<Alignment, RegisterError> {
        Ok(Alignment {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
            confidence: 0.9,
            scale_x: 0.2,
            scale_y: 0.2,
        })
    }

    fn ids(c: &Collection) -> Vec<&str> {
        c.record_ids().collect()
    }

    #[test]
    fn small_magnification_steps_are_not_levels() {
        let records = vec![level("a.tif", 100.0, 0.0, 0.0), level("b.tif", 140.0, 0.0, 0.0)];
        let out = PyramidBuilder::default().build(&records, &ModeClassifier::default(), &accept_all);
        assert!(out.is_empty());
    }

    #[test]
    fn weak_matches_and_errors_skip_the_candidate() {
        let records = vec![
            level("a.tif", 100.0, 0.0, 0.0),
            level("b.tif", 500.0, 0.0, 0.0),
            level("c.tif", 2000.0, 0.0, 0.0),
        ];
        let reject_b = |_: &ImageRecord, fine: &ImageRecord| -> Result<Alignment, RegisterError> {
            if fine.id == "b.tif" {
                Ok(Alignment {
                    confidence: 0.3,
                    ..accept_all(fine, fine)?
                })
            } else {
                accept_all(fine, fine)
            }
        };
        let out = PyramidBuilder::default().build(&records, &ModeClassifier::default(), &reject_b);
        // a -> c (b skipped) and b -> c as its own chain.
        assert_eq!(out.len(), 2);
        assert_eq!(ids(&out[0]), ["a.tif", "c.tif"]);
        assert_eq!(ids(&out[1]), ["b.tif", "c.tif"]);
    }

    #[test]
    fn modes_never_mix_within_a_chain() {
        let mut sed = level("s.tif", 500.0, 0.0, 0.0);
        sed.detector.name = Some("SED".into());
        let records = vec![level("a.tif", 100.0, 0.0, 0.0), sed];
        let out = PyramidBuilder::default().build(&records, &ModeClassifier::default(), &accept_all);
        assert!(out.is_empty());
    }

    #[test]
    fn pairs_are_confirmed_once_per_group() {
        let records = vec![
            level("a.tif", 100.0, 0.0, 0.0),
            level("b.tif", 500.0, 0.0, 0.0),
            level("c.tif", 2000.0, 0.0, 0.0),
        ];
        let calls = Cell::new(0);
        let counting = |c: &ImageRecord, f: &ImageRecord| {
            calls.set(calls.get() + 1);
            accept_all(c, f)
        };
        let builder = PyramidBuilder::default();
        let groups: Vec<Labeled<'_>> = Labeled::all(&ModeClassifier::default(), &records);
        let out = builder.build_group(&groups, &counting);
        assert_eq!(out.len(), 2);
        // (a,b), (b,c) from head a; (b,c) is reused for head b.
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn provenance_lists_levels() {
        let records = vec![level("a.tif", 100.0, 0.0, 0.0), level("b.tif", 500.0, 10.0, 0.0)];
        let out = PyramidBuilder::default().build(&records, &ModeClassifier::default(), &accept_all);
        assert_eq!(out.len(), 1);
        let p = &out[0];
        assert_eq!(p.kind, CollectionKind::Pyramid);
        assert_eq!(p.id, "mag_grid_bsd_15kv_a");
        assert_eq!(p.provenance.magnifications, vec![100.0, 500.0]);
        assert_eq!(p.provenance.voltage_kv, Some(15));
        assert!(p.entries[0].alignment.is_none());
        assert!(p.entries[1].alignment.is_some());
    }
}
