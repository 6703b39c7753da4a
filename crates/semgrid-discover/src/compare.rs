//! Cross-session sets: comparable acquisitions drawn from independent pools.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use semgrid_core::ImageRecord;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Collection, CollectionEntry, CollectionKind, ModeClassifier, ModeLabel, Provenance};

/// Records from one acquisition session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPool {
    pub session_id: String,
    pub records: Vec<ImageRecord>,
}

impl SessionPool {
    pub fn new(session_id: impl Into<String>, records: Vec<ImageRecord>) -> Self {
        Self {
            session_id: session_id.into(),
            records,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareParams {
    /// Relative width of a magnification band, measured from its lowest member.
    pub magnification_tolerance: f64,
    /// Alternates kept per entry, closest first. `None` keeps all.
    pub max_alternates: Option<usize>,
}

impl Default for CompareParams {
    fn default() -> Self {
        Self {
            magnification_tolerance: 0.12,
            max_alternates: Some(4),
        }
    }
}

/// Partition magnifications into bands with one ascending sweep.
///
/// A value opens a new band when it exceeds the current band's first value
/// by more than `tolerance` (relative). Duplicates collapse. The sweep is
/// anchored on the lowest member, so a long run of small steps can span
/// more than `tolerance` across two adjacent bands.
pub fn band_magnifications(magnifications: &[f64], tolerance: f64) -> Vec<Vec<f64>> {
    let mut values: Vec<f64> = magnifications
        .iter()
        .copied()
        .filter(|m| m.is_finite() && *m > 0.0)
        .collect();
    values.sort_by(f64::total_cmp);
    values.dedup();

    let mut bands: Vec<Vec<f64>> = Vec::new();
    for m in values {
        match bands.last_mut() {
            Some(band) if (m - band[0]) / band[0] <= tolerance => band.push(m),
            _ => bands.push(vec![m]),
        }
    }
    bands
}

/// Median of an ascending band; the mean of the two central values for
/// even sizes. `None` for an empty band.
pub fn representative_magnification(band: &[f64]) -> Option<f64> {
    let n = band.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(band[n / 2]),
        _ => Some(0.5 * (band[n / 2 - 1] + band[n / 2])),
    }
}

/// Groups records of several session pools by mode, voltage and
/// magnification band.
#[derive(Clone, Debug, Default)]
pub struct CrossSessionGrouper {
    params: CompareParams,
}

/// A pool record usable for comparison.
struct Candidate<'a> {
    pool: usize,
    record: &'a ImageRecord,
    mag: f64,
}

impl CrossSessionGrouper {
    pub fn new(params: CompareParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CompareParams {
        &self.params
    }

    /// One collection per (mode label, magnification band) represented in
    /// at least two pools. Entries follow pool order.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(pools = pools.len()))
    )]
    pub fn group(&self, pools: &[SessionPool], classifier: &ModeClassifier) -> Vec<Collection> {
        let mut by_label: BTreeMap<ModeLabel, Vec<Candidate<'_>>> = BTreeMap::new();
        for (pool, session) in pools.iter().enumerate() {
            for record in &session.records {
                let Ok(mag) = record.magnification() else {
                    debug!(
                        "{}/{}: no magnification, not comparable",
                        session.session_id, record.id
                    );
                    continue;
                };
                by_label
                    .entry(classifier.classify(record))
                    .or_default()
                    .push(Candidate { pool, record, mag });
            }
        }

        let mut out = Vec::new();
        for (label, candidates) in &by_label {
            let sessions: BTreeSet<usize> = candidates.iter().map(|c| c.pool).collect();
            if sessions.len() < 2 {
                continue;
            }
            let mags: Vec<f64> = candidates.iter().map(|c| c.mag).collect();
            for band in band_magnifications(&mags, self.params.magnification_tolerance) {
                if let Some(set) = self.band_collection(label, &band, candidates, pools) {
                    out.push(set);
                }
            }
        }
        info!("found {} cross-session set(s)", out.len());
        out
    }

    fn band_collection(
        &self,
        label: &ModeLabel,
        band: &[f64],
        candidates: &[Candidate<'_>],
        pools: &[SessionPool],
    ) -> Option<Collection> {
        let rep = representative_magnification(band)?;
        let (lo, hi) = (band[0], band[band.len() - 1]);

        let mut entries = Vec::new();
        for (pool, session) in pools.iter().enumerate() {
            let mut picks: Vec<&Candidate<'_>> = candidates
                .iter()
                .filter(|c| c.pool == pool && c.mag >= lo && c.mag <= hi)
                .collect();
            picks.sort_by(|a, b| {
                (a.mag - rep)
                    .abs()
                    .total_cmp(&(b.mag - rep).abs())
                    .then_with(|| a.record.id.cmp(&b.record.id))
            });
            let Some((best, rest)) = picks.split_first() else {
                continue;
            };
            let keep = self.params.max_alternates.unwrap_or(usize::MAX);
            entries.push(CollectionEntry {
                alternates: rest.iter().take(keep).map(|c| c.record.id.clone()).collect(),
                session: Some(session.session_id.clone()),
                ..CollectionEntry::new(best.record.clone(), label.clone())
            });
        }
        if entries.len() < 2 {
            return None;
        }

        let rep_x = rep.trunc() as i64;
        let (id, description) = match label.voltage_kv {
            Some(kv) => (
                format!("compare_{}_{rep_x}_{kv}", label.mode),
                format!("{} mode at {rep_x}x, {kv} kV", label.mode),
            ),
            None => (
                format!("compare_{}_{rep_x}", label.mode),
                format!("{} mode at {rep_x}x", label.mode),
            ),
        };
        Some(Collection {
            kind: CollectionKind::CrossSessionSet,
            id,
            entries,
            provenance: Provenance {
                mode: Some(label.mode.clone()),
                voltage_kv: label.voltage_kv,
                magnification: Some(rep),
                description,
                ..Provenance::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rec(id: &str, detector: &str, kv: f64, mag: f64) -> ImageRecord {
        ImageRecord::new(id, 1024, 768)
            .with_magnification(mag)
            .with_detector(detector, kv)
    }

    #[test]
    fn banding_sweeps_from_the_lowest_member() {
        let bands = band_magnifications(&[205.0, 98.0, 102.0], 0.12);
        assert_eq!(bands, vec![vec![98.0, 102.0], vec![205.0]]);
        // 110 is within 12% of 100, 120 is not, even though it is within 12% of 110.
        let bands = band_magnifications(&[100.0, 110.0, 120.0, 110.0], 0.12);
        assert_eq!(bands, vec![vec![100.0, 110.0], vec![120.0]]);
        assert!(band_magnifications(&[], 0.12).is_empty());
    }

    #[test]
    fn representative_is_the_median() {
        assert_eq!(representative_magnification(&[]), None);
        assert_eq!(representative_magnification(&[98.0, 100.0, 110.0]), Some(100.0));
        assert_relative_eq!(
            representative_magnification(&[98.0, 102.0]).unwrap(),
            100.0
        );
    }

    #[test]
    fn one_entry_per_session_with_closest_first() {
        let pools = vec![
            SessionPool::new(
                "s1",
                vec![rec("s1_a.tif", "SED", 15.0, 480.0), rec("s1_b.tif", "SED", 15.0, 500.0)],
            ),
            SessionPool::new("s2", vec![rec("s2_a.tif", "SED", 15.0, 520.0)]),
            SessionPool::new("s3", vec![rec("s3_a.tif", "BSD", 15.0, 500.0)]),
        ];
        let sets = CrossSessionGrouper::default().group(&pools, &ModeClassifier::default());
        assert_eq!(sets.len(), 1);
        let set = &sets[0];
        assert_eq!(set.kind, CollectionKind::CrossSessionSet);
        assert_eq!(set.id, "compare_sed_500_15");
        assert_eq!(set.provenance.description, "sed mode at 500x, 15 kV");
        assert_eq!(set.record_ids().collect::<Vec<_>>(), ["s1_b.tif", "s2_a.tif"]);
        assert_eq!(set.entries[0].alternates, vec!["s1_a.tif"]);
        assert_eq!(set.entries[0].session.as_deref(), Some("s1"));
        assert_eq!(set.entries[1].session.as_deref(), Some("s2"));
    }

    #[test]
    fn voltage_splits_sets_and_single_pools_are_dropped() {
        let pools = vec![
            SessionPool::new("s1", vec![rec("a.tif", "SED", 5.0, 500.0)]),
            SessionPool::new("s2", vec![rec("b.tif", "SED", 15.0, 500.0)]),
        ];
        assert!(CrossSessionGrouper::default()
            .group(&pools, &ModeClassifier::default())
            .is_empty());
    }

    #[test]
    fn bands_without_two_sessions_are_dropped() {
        let pools = vec![
            SessionPool::new(
                "s1",
                vec![rec("a.tif", "SED", 15.0, 100.0), rec("b.tif", "SED", 15.0, 2000.0)],
            ),
            SessionPool::new("s2", vec![rec("c.tif", "SED", 15.0, 105.0)]),
        ];
        let sets = CrossSessionGrouper::default().group(&pools, &ModeClassifier::default());
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].provenance.magnification, Some(102.5));
        assert_eq!(sets[0].id, "compare_sed_102_15");
    }

    #[test]
    fn alternates_are_capped() {
        let many: Vec<ImageRecord> = (0..7)
            .map(|i| rec(&format!("s1_{i}.tif"), "SED", 15.0, 500.0 + i as f64))
            .collect();
        let pools = vec![
            SessionPool::new("s1", many),
            SessionPool::new("s2", vec![rec("s2.tif", "SED", 15.0, 503.0)]),
        ];
        let sets = CrossSessionGrouper::default().group(&pools, &ModeClassifier::default());
        assert_eq!(sets[0].entries[0].alternates.len(), 4);

        let all = CrossSessionGrouper::new(CompareParams {
            max_alternates: None,
            ..CompareParams::default()
        })
        .group(&pools, &ModeClassifier::default());
        assert_eq!(all[0].entries[0].alternates.len(), 6);
    }
}
