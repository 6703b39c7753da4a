//! One discovery pass over a set of session pools.

use log::{debug, info, warn};
use semgrid_register::Registrar;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Collection, CrossSessionGrouper, DiscoveryConfig, DiscoveryReport, ModeClassifier, ModeSetBuilder,
    PairConfirmer, PyramidBuilder, SceneCluster, SceneClusterer, SessionPool, SessionSummary,
};

/// Every discovery stage, configured once and run over explicit pools.
#[derive(Clone, Debug)]
pub struct Discovery {
    pub classifier: ModeClassifier,
    pub clusterer: SceneClusterer,
    pub mode_sets: ModeSetBuilder,
    pub pyramids: PyramidBuilder,
    pub compare: CrossSessionGrouper,
    pub find_pyramids: bool,
    pub find_mode_sets: bool,
    pub find_cross_session: bool,
    registrar: Registrar,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::new(Vec::new()))
    }
}

impl Discovery {
    pub fn from_config(cfg: &DiscoveryConfig) -> Self {
        Self {
            classifier: cfg.classifier,
            clusterer: SceneClusterer::new(cfg.cluster.clone()),
            mode_sets: ModeSetBuilder::new(cfg.mode_sets.clone()),
            pyramids: PyramidBuilder::new(cfg.pyramid.clone()),
            compare: CrossSessionGrouper::new(cfg.compare.clone()),
            find_pyramids: cfg.find_pyramids,
            find_mode_sets: cfg.find_mode_sets,
            find_cross_session: cfg.find_cross_session,
            registrar: Registrar::new(cfg.registrar.clone()),
        }
    }

    /// Registrar configured for this run, for building a pixel-backed confirmer.
    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    /// Cluster each pool, then build the enabled collection kinds.
    ///
    /// Pyramids need image confirmation; without a `confirmer` they are
    /// skipped. Mode sets and pyramids are found per pool, cross-session
    /// sets across all pools. Collections come out grouped by kind in that
    /// order.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(pools = pools.len()))
    )]
    pub fn run(
        &self,
        pools: &[SessionPool],
        confirmer: Option<&(dyn PairConfirmer + Sync)>,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut mode_sets = Vec::new();
        let mut pyramids = Vec::new();

        for pool in pools {
            let clusters = self.clusterer.cluster(&pool.records);
            let skipped: Vec<String> = pool
                .records
                .iter()
                .filter(|r| r.center_um().is_err())
                .map(|r| r.id.clone())
                .collect();
            if !skipped.is_empty() {
                warn!(
                    "{}: {} record(s) without stage position skipped",
                    pool.session_id,
                    skipped.len()
                );
            }

            if self.find_mode_sets {
                mode_sets.extend(self.mode_sets.build(&clusters, &pool.records, &self.classifier));
            }
            let incomplete = pool.records.iter().filter(|r| !r.is_complete()).count();
            if incomplete > 0 {
                debug!(
                    "{}: {incomplete} record(s) lack detector, magnification or footprint",
                    pool.session_id
                );
            }

            let mut clusters = clusters;
            if self.find_pyramids {
                match confirmer {
                    Some(c) => {
                        let found = self.pyramids.build(&pool.records, &self.classifier, c);
                        clusters = annotate(clusters, &found);
                        pyramids.extend(found);
                    }
                    None => warn!(
                        "{}: no image confirmer, pyramid search skipped",
                        pool.session_id
                    ),
                }
            }

            report.sessions.push(SessionSummary {
                session_id: pool.session_id.clone(),
                records: pool.records.len(),
                clusters,
                skipped,
            });
        }

        report.collections.extend(pyramids);
        report.collections.extend(mode_sets);
        if self.find_cross_session {
            report
                .collections
                .extend(self.compare.group(pools, &self.classifier));
        }
        info!(
            "discovery over {} pool(s) produced {} collection(s)",
            pools.len(),
            report.collections.len()
        );
        report
    }
}

/// Attach each confirmed pyramid level's alignment to the cluster holding it.
fn annotate(clusters: Vec<SceneCluster>, pyramids: &[Collection]) -> Vec<SceneCluster> {
    clusters
        .into_iter()
        .map(|cluster| {
            pyramids
                .iter()
                .flat_map(|p| &p.entries)
                .filter_map(|e| Some((e.record.id.as_str(), e.alignment?)))
                .filter(|(id, _)| cluster.contains(id))
                .fold(cluster.clone(), |c, (id, a)| c.with_alignment(id, a))
        })
        .collect()
}
