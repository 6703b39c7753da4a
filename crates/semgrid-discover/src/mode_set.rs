//! Mode sets: one scene imaged with several detector configurations.

use std::collections::{BTreeSet, HashMap};

use log::debug;
use semgrid_core::ImageRecord;
use serde::{Deserialize, Serialize};

use crate::{
    preferred_rank, Collection, CollectionEntry, CollectionKind, ModeClassifier, Provenance,
    SceneCluster, VaryingParameters,
};

/// Configuration for [`ModeSetBuilder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSetParams {
    /// Entry order by mode prefix; unlisted modes go last.
    pub preferred_order: Vec<String>,
    /// Minimum number of distinct mode labels in a set.
    pub min_modes: usize,
}

impl Default for ModeSetParams {
    fn default() -> Self {
        Self {
            preferred_order: ["sed", "bsd", "topo", "edx"].map(String::from).to_vec(),
            min_modes: 2,
        }
    }
}

/// Builds one mode set per scene cluster holding enough distinct modes.
#[derive(Clone, Debug, Default)]
pub struct ModeSetBuilder {
    params: ModeSetParams,
}

impl ModeSetBuilder {
    pub fn new(params: ModeSetParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ModeSetParams {
        &self.params
    }

    /// One entry per mode label: the cluster's first record with that label
    /// is primary, later ones are its alternates.
    pub fn build(
        &self,
        clusters: &[SceneCluster],
        records: &[ImageRecord],
        classifier: &ModeClassifier,
    ) -> Vec<Collection> {
        let by_id: HashMap<&str, &ImageRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();
        clusters
            .iter()
            .filter_map(|cluster| {
                let members: Vec<&ImageRecord> = cluster
                    .members
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()).copied())
                    .collect();
                self.build_one(cluster, &members, classifier)
            })
            .collect()
    }

    fn build_one(
        &self,
        cluster: &SceneCluster,
        members: &[&ImageRecord],
        classifier: &ModeClassifier,
    ) -> Option<Collection> {
        if members.len() < 2 {
            return None;
        }
        let mut slots: Vec<CollectionEntry> = Vec::new();
        let mut slot_of: HashMap<String, usize> = HashMap::new();
        for &record in members {
            let label = classifier.classify(record);
            match slot_of.get(&label.key) {
                Some(&i) => slots[i].alternates.push(record.id.clone()),
                None => {
                    slot_of.insert(label.key.clone(), slots.len());
                    slots.push(CollectionEntry::new(record.clone(), label));
                }
            }
        }
        if slots.len() < self.params.min_modes.max(2) {
            debug!(
                "scene {} has {} distinct mode(s); no mode set",
                cluster.key,
                slots.len()
            );
            return None;
        }
        slots.sort_by_key(|e| preferred_rank(&self.params.preferred_order, &e.mode.key));

        let anchor = members[0];
        Some(Collection {
            kind: CollectionKind::ModeSet,
            id: format!("mode_grid_{}", cluster.key),
            provenance: Provenance {
                position: Some(cluster.anchor),
                field_of_view: anchor.fov().ok(),
                varying: Some(varying_parameters(&slots)),
                description: format!("Different modes at position {}", cluster.key),
                ..Provenance::default()
            },
            entries: slots,
        })
    }
}

/// Parameters that take more than one value across the primaries.
fn varying_parameters(entries: &[CollectionEntry]) -> VaryingParameters {
    let mut voltages = BTreeSet::new();
    let mut currents = BTreeSet::new();
    let mut integrations = BTreeSet::new();
    for e in entries {
        let d = &e.record.detector;
        if let Some(v) = d.high_voltage_kv {
            voltages.insert(v.to_bits());
        }
        if let Some(c) = d.emission_current_ua {
            currents.insert(c.to_bits());
        }
        if let Some(n) = d.integrations {
            integrations.insert(n);
        }
    }
    VaryingParameters {
        high_voltage: voltages.len() > 1,
        emission_current: currents.len() > 1,
        integrations: integrations.len() > 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SceneClusterer;

    fn rec(id: &str, detector: &str, kv: f64) -> ImageRecord {
        ImageRecord::new(id, 1024, 768)
            .with_center(10.0, 20.0)
            .with_field_of_view(50.0, 50.0)
            .with_magnification(2000.0)
            .with_detector(detector, kv)
    }

    #[test]
    fn one_entry_per_mode_in_preferred_order() {
        let records = vec![
            rec("edx.tif", "EDX", 15.0),
            rec("bsd_a.tif", "BSD", 15.0),
            rec("sed.tif", "SED", 15.0),
            rec("bsd_b.tif", "BSD", 15.0),
        ];
        let clusters = SceneClusterer::default().cluster(&records);
        let sets = ModeSetBuilder::default().build(&clusters, &records, &ModeClassifier::default());
        assert_eq!(sets.len(), 1);
        let set = &sets[0];
        assert_eq!(set.kind, CollectionKind::ModeSet);
        assert_eq!(set.id, "mode_grid_10_20");
        let modes: Vec<&str> = set.entries.iter().map(|e| e.mode.key.as_str()).collect();
        assert_eq!(modes, ["sed_15kv", "bsd_15kv", "edx_15kv"]);
        assert_eq!(set.entries[1].record.id, "bsd_a.tif");
        assert_eq!(set.entries[1].alternates, vec!["bsd_b.tif"]);
        assert_eq!(set.provenance.varying, Some(VaryingParameters::default()));
    }

    #[test]
    fn single_mode_scene_is_not_a_mode_set() {
        let records = vec![rec("a.tif", "SED", 15.0), rec("b.tif", "SED", 15.0)];
        let clusters = SceneClusterer::default().cluster(&records);
        let sets = ModeSetBuilder::default().build(&clusters, &records, &ModeClassifier::default());
        assert!(sets.is_empty());
    }

    #[test]
    fn voltage_changes_are_distinct_modes_and_reported() {
        let mut low = rec("sed5.tif", "SED", 5.0);
        low.detector.integrations = Some(16);
        let mut high = rec("sed15.tif", "SED", 15.0);
        high.detector.integrations = Some(16);
        let records = vec![low, high];
        let clusters = SceneClusterer::default().cluster(&records);
        let sets = ModeSetBuilder::default().build(&clusters, &records, &ModeClassifier::default());
        let varying = sets[0].provenance.varying.unwrap();
        assert!(varying.high_voltage);
        assert!(!varying.integrations);
        assert!(!varying.emission_current);
    }
}
