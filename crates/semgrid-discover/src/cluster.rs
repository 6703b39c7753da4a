//! Grouping records into "same physical scene" clusters.
//!
//! Clustering is anchor-based. Records are first grouped by bit-identical
//! stage position. In the tolerance phase each group is then compared
//! against the anchor (first record) of every existing cluster, never
//! against all members. [`SceneClusterer::merge_transitive`] is a separate
//! opt-in pass for callers that need connected components instead.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use semgrid_core::{ImageRecord, StagePosition};
use semgrid_register::Alignment;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStrategy {
    /// Bit-identical positions only (plus equal collection tags).
    ExactOnly,
    /// Exact groups merged by positional tolerance against cluster anchors.
    #[default]
    ExactThenTolerance,
}

/// Tolerances for [`SceneClusterer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub strategy: ClusterStrategy,
    /// Allowed center offset per axis, as a fraction of the larger field of view.
    pub position_tolerance: f64,
    /// Relative magnification difference that still counts as agreeing.
    pub magnification_tolerance: f64,
    /// Relative working-distance difference that still counts as agreeing.
    pub working_distance_tolerance: f64,
    /// Lower bound on the field of view used to scale the position tolerance, µm.
    pub min_fov_um: f64,
    /// Attach overlays to the cluster of the primary sharing their base name.
    pub attach_overlays: bool,
    /// Run [`SceneClusterer::merge_transitive`] after anchor clustering.
    pub transitive: bool,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            strategy: ClusterStrategy::default(),
            position_tolerance: 0.12,
            magnification_tolerance: 0.10,
            working_distance_tolerance: 0.20,
            min_fov_um: 10.0,
            attach_overlays: true,
            transitive: false,
        }
    }
}

/// Records imaging one physical scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneCluster {
    /// Exact position key of the anchor record, `"{x}_{y}"`.
    pub key: String,
    pub anchor: StagePosition,
    /// Member ids, anchor first.
    pub members: Vec<String>,
    /// Per-member registration results, when registration was attempted.
    #[serde(default)]
    pub alignments: BTreeMap<String, Alignment>,
}

impl SceneCluster {
    fn new(anchor: StagePosition) -> Self {
        Self {
            key: format!("{}_{}", anchor.x_um, anchor.y_um),
            anchor,
            members: Vec::new(),
            alignments: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    /// Annotated copy carrying the registration result of one member.
    pub fn with_alignment(mut self, id: impl Into<String>, alignment: Alignment) -> Self {
        self.alignments.insert(id.into(), alignment);
        self
    }
}

/// Two-phase scene clustering over one record pool.
#[derive(Clone, Debug, Default)]
pub struct SceneClusterer {
    params: ClusterParams,
}

impl SceneClusterer {
    pub fn new(params: ClusterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    /// Cluster a pool. Records without a usable center are skipped.
    ///
    /// Output does not depend on input order: records are processed in a
    /// canonical (x, y, id) order, and clusters and members keep it.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(records = records.len()))
    )]
    pub fn cluster(&self, records: &[ImageRecord]) -> Vec<SceneCluster> {
        let mut ordered: Vec<(&ImageRecord, StagePosition)> = Vec::with_capacity(records.len());
        for r in records {
            match r.center_um() {
                Ok(c) => ordered.push((r, StagePosition::new(c.x, c.y))),
                Err(err) => debug!("skipping {} for clustering: {err}", r.id),
            }
        }
        if ordered.is_empty() {
            return Vec::new();
        }
        ordered.sort_by(|a, b| canonical(a.0, a.1, b.0, b.1));

        let (primaries, overlays) = self.split_overlays(&ordered);

        // Exact phase.
        let mut groups: Vec<Vec<&ImageRecord>> = Vec::new();
        let mut anchors: Vec<StagePosition> = Vec::new();
        let mut by_bits: HashMap<(u64, u64), usize> = HashMap::new();
        for &(r, pos) in &primaries {
            let bits = (pos.x_um.to_bits(), pos.y_um.to_bits());
            let idx = *by_bits.entry(bits).or_insert_with(|| {
                groups.push(Vec::new());
                anchors.push(pos);
                groups.len() - 1
            });
            groups[idx].push(r);
        }

        // Tolerance phase (and tag merging, which applies to every strategy).
        let mut clusters: Vec<(SceneCluster, Vec<&ImageRecord>)> = Vec::new();
        for (group, anchor) in groups.into_iter().zip(anchors) {
            let target = clusters.iter().position(|(_, members)| {
                shares_tag(members, &group)
                    || (self.params.strategy == ClusterStrategy::ExactThenTolerance
                        && self.same_scene(members[0], group[0]))
            });
            match target {
                Some(i) => clusters[i].1.extend(group),
                None => clusters.push((SceneCluster::new(anchor), group)),
            }
        }

        let mut out: Vec<SceneCluster> = clusters
            .into_iter()
            .map(|(mut cluster, members)| {
                cluster.members = members.iter().map(|r| r.id.clone()).collect();
                cluster
            })
            .collect();

        for (overlay, primary_id) in overlays {
            if let Some(c) = out.iter_mut().find(|c| c.contains(primary_id)) {
                c.members.push(overlay.id.clone());
            }
        }

        if self.params.transitive {
            out = self.merge_transitive(out, records);
        }
        info!(
            "clustered {} records into {} scenes",
            ordered.len(),
            out.len()
        );
        out
    }

    /// Whether two records image the same scene.
    ///
    /// Equal collection tags always match. Otherwise the centers must be
    /// identical, or lie within `position_tolerance` of the larger field of
    /// view on both axes while magnification or working distance agrees.
    /// Missing metadata never matches.
    pub fn same_scene(&self, a: &ImageRecord, b: &ImageRecord) -> bool {
        if let (Some(ta), Some(tb)) = (&a.collection_tag, &b.collection_tag) {
            if ta == tb {
                return true;
            }
        }
        let (Ok(ca), Ok(cb)) = (a.center_um(), b.center_um()) else {
            return false;
        };
        if ca == cb {
            return true;
        }
        let (Ok(fa), Ok(fb)) = (a.fov(), b.fov()) else {
            return false;
        };
        let p = &self.params;
        let fov_w = fa.width_um.max(fb.width_um).max(p.min_fov_um);
        let fov_h = fa.height_um.max(fb.height_um).max(p.min_fov_um);
        let near = (ca.x - cb.x).abs() / fov_w <= p.position_tolerance
            && (ca.y - cb.y).abs() / fov_h <= p.position_tolerance;
        if !near {
            return false;
        }
        agrees(a.magnification, b.magnification, p.magnification_tolerance)
            || agrees(
                a.working_distance_mm,
                b.working_distance_mm,
                p.working_distance_tolerance,
            )
    }

    /// Merge clusters connected by any same-scene member pair.
    ///
    /// Merged clusters keep the earliest anchor; members keep cluster order.
    pub fn merge_transitive(
        &self,
        clusters: Vec<SceneCluster>,
        records: &[ImageRecord],
    ) -> Vec<SceneCluster> {
        let by_id: HashMap<&str, &ImageRecord> = records.iter().map(|r| (r.id.as_str(), r)).collect();
        let members: Vec<Vec<&ImageRecord>> = clusters
            .iter()
            .map(|c| c.members.iter().filter_map(|m| by_id.get(m.as_str()).copied()).collect())
            .collect();

        let mut parent: Vec<usize> = (0..clusters.len()).collect();
        for i in 0..clusters.len() {
            for j in i + 1..clusters.len() {
                let linked = members[i]
                    .iter()
                    .any(|a| members[j].iter().any(|b| self.same_scene(a, b)));
                if linked {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        parent[ri.max(rj)] = ri.min(rj);
                    }
                }
            }
        }

        let mut merged: Vec<SceneCluster> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();
        for (i, cluster) in clusters.into_iter().enumerate() {
            let root = find(&mut parent, i);
            match slot.get(&root) {
                Some(&k) => {
                    let target = &mut merged[k];
                    target.members.extend(cluster.members);
                    target.alignments.extend(cluster.alignments);
                }
                None => {
                    slot.insert(root, merged.len());
                    merged.push(cluster);
                }
            }
        }
        merged
    }

    /// Split overlays that have a primary with the same base name.
    ///
    /// Overlays without such a primary stay in the positional pool.
    fn split_overlays<'a>(
        &self,
        ordered: &[(&'a ImageRecord, StagePosition)],
    ) -> (
        Vec<(&'a ImageRecord, StagePosition)>,
        Vec<(&'a ImageRecord, &'a str)>,
    ) {
        if !self.params.attach_overlays {
            return (ordered.to_vec(), Vec::new());
        }
        let mut primary_by_base: HashMap<String, &'a str> = HashMap::new();
        for &(r, _) in ordered {
            if !r.is_overlay() {
                primary_by_base
                    .entry(r.base_name())
                    .or_insert(r.id.as_str());
            }
        }
        let mut primaries = Vec::with_capacity(ordered.len());
        let mut overlays = Vec::new();
        for &(r, pos) in ordered {
            match (r.is_overlay(), primary_by_base.get(&r.base_name())) {
                (true, Some(&primary)) => overlays.push((r, primary)),
                _ => primaries.push((r, pos)),
            }
        }
        (primaries, overlays)
    }
}

fn canonical(
    a: &ImageRecord,
    pa: StagePosition,
    b: &ImageRecord,
    pb: StagePosition,
) -> Ordering {
    pa.x_um
        .total_cmp(&pb.x_um)
        .then(pa.y_um.total_cmp(&pb.y_um))
        .then_with(|| a.id.cmp(&b.id))
}

fn shares_tag(a: &[&ImageRecord], b: &[&ImageRecord]) -> bool {
    a.iter().filter_map(|r| r.collection_tag.as_ref()).any(|ta| {
        b.iter()
            .filter_map(|r| r.collection_tag.as_ref())
            .any(|tb| ta == tb)
    })
}

fn agrees(a: Option<f64>, b: Option<f64>, tolerance: f64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) if a.is_finite() && b.is_finite() => {
            let scale = a.abs().max(b.abs());
            scale == 0.0 || (a - b).abs() / scale <= tolerance
        }
        _ => false,
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, x: f64, y: f64) -> ImageRecord {
        ImageRecord::new(id, 1024, 768)
            .with_center(x, y)
            .with_field_of_view(100.0, 75.0)
            .with_magnification(1000.0)
            .with_working_distance(5.0)
    }

    fn memberships(clusters: &[SceneCluster]) -> Vec<Vec<String>> {
        let mut sets: Vec<Vec<String>> = clusters
            .iter()
            .map(|c| {
                let mut m = c.members.clone();
                m.sort();
                m
            })
            .collect();
        sets.sort();
        sets
    }

    #[test]
    fn empty_pool_gives_no_clusters() {
        assert!(SceneClusterer::default().cluster(&[]).is_empty());
    }

    #[test]
    fn exact_positions_group_even_when_tolerance_is_off() {
        let params = ClusterParams {
            strategy: ClusterStrategy::ExactOnly,
            ..ClusterParams::default()
        };
        let records = vec![
            rec("a.tif", 100.0, 200.0),
            rec("b.tif", 100.0, 200.0),
            rec("c.tif", 101.0, 200.0),
        ];
        let clusters = SceneClusterer::new(params).cluster(&records);
        assert_eq!(
            memberships(&clusters),
            vec![vec!["a.tif".to_string(), "b.tif".into()], vec!["c.tif".into()]]
        );
        assert_eq!(clusters[0].key, "100_200");
    }

    #[test]
    fn tolerance_requires_magnification_or_working_distance_agreement() {
        let c = SceneClusterer::default();
        let a = rec("a.tif", 0.0, 0.0);
        // 10 µm on a 100 µm field of view is within 12%.
        let near = rec("b.tif", 10.0, -8.0);
        assert!(c.same_scene(&a, &near));

        let mut other_mag = near.clone().with_magnification(2000.0);
        assert!(c.same_scene(&a, &other_mag));
        other_mag.working_distance_mm = Some(9.0);
        assert!(!c.same_scene(&a, &other_mag));

        let far = rec("c.tif", 13.0, 0.0);
        assert!(!c.same_scene(&a, &far));
    }

    #[test]
    fn small_fields_of_view_use_the_floor() {
        let c = SceneClusterer::default();
        let a = rec("a.tif", 0.0, 0.0).with_field_of_view(2.0, 2.0);
        let b = rec("b.tif", 1.1, 0.0).with_field_of_view(2.0, 2.0);
        // 1.1 µm against a 10 µm floor is 11%.
        assert!(c.same_scene(&a, &b));
    }

    #[test]
    fn equal_tags_always_match() {
        let c = SceneClusterer::default();
        let a = rec("a.tif", 0.0, 0.0).with_collection_tag("site-3");
        let b = rec("b.tif", 5000.0, 5000.0).with_collection_tag("site-3");
        assert!(c.same_scene(&a, &b));
        let clusters = c.cluster(&[a, b]);
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn overlay_follows_its_primary() {
        let primary = rec("scan_01.tif", 0.0, 0.0);
        // Overlay metadata often carries a different, unrelated position.
        let overlay = rec("scan_01_ChemiSEM.tif", 900.0, 900.0);
        let orphan = rec("scan_02_ChemiSEM.tif", 900.0, 900.0);
        let clusters = SceneClusterer::default().cluster(&[overlay, primary, orphan]);
        assert_eq!(
            memberships(&clusters),
            vec![
                vec!["scan_01.tif".to_string(), "scan_01_ChemiSEM.tif".into()],
                vec!["scan_02_ChemiSEM.tif".into()],
            ]
        );
    }

    #[test]
    fn anchor_test_is_not_transitive_unless_requested() {
        // b is near a and c is near b, but c is too far from the anchor a.
        let records = vec![
            rec("a.tif", 0.0, 0.0),
            rec("b.tif", 10.0, 0.0),
            rec("c.tif", 20.0, 0.0),
        ];
        let anchored = SceneClusterer::default().cluster(&records);
        assert_eq!(anchored.len(), 2);

        let params = ClusterParams {
            transitive: true,
            ..ClusterParams::default()
        };
        let transitive = SceneClusterer::new(params).cluster(&records);
        assert_eq!(transitive.len(), 1);
        assert_eq!(transitive[0].members, vec!["a.tif", "b.tif", "c.tif"]);
    }

    #[test]
    fn records_without_center_are_skipped() {
        let mut blind = rec("blind.tif", 0.0, 0.0);
        blind.center = None;
        let clusters = SceneClusterer::default().cluster(&[blind, rec("a.tif", 0.0, 0.0)]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec!["a.tif"]);
    }

    #[test]
    fn alignment_annotation_is_a_copy() {
        let clusters = SceneClusterer::default().cluster(&[rec("a.tif", 0.0, 0.0)]);
        let alignment = Alignment {
            x: 1,
            y: 2,
            width: 3,
            height: 4,
            confidence: 0.95,
            scale_x: 0.5,
            scale_y: 0.5,
        };
        let annotated = clusters[0].clone().with_alignment("a.tif", alignment);
        assert!(clusters[0].alignments.is_empty());
        assert_eq!(annotated.alignments["a.tif"], alignment);
    }
}
