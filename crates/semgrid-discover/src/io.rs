//! JSON run configuration and report helpers for discovery.

use std::{
    fs,
    path::{Path, PathBuf},
};

use semgrid_core::ImageRecord;
use semgrid_register::RegistrarParams;
use serde::{Deserialize, Serialize};

use crate::{
    ClusterParams, Collection, CompareParams, ModeClassifier, ModeSetParams, PyramidParams,
    SceneCluster, SessionPool,
};

#[derive(thiserror::Error, Debug)]
pub enum DiscoverIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn enabled() -> bool {
    true
}

/// One session: an id plus a JSON file holding an array of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub session_id: String,
    /// Relative paths resolve against the config file's directory.
    pub records_path: String,
}

/// Configuration for a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub pools: Vec<PoolSpec>,
    #[serde(default)]
    pub output_path: Option<String>,
    /// Directory holding the image files named by record ids.
    #[serde(default)]
    pub image_root: Option<String>,
    #[serde(default)]
    pub classifier: ModeClassifier,
    #[serde(default)]
    pub cluster: ClusterParams,
    #[serde(default)]
    pub mode_sets: ModeSetParams,
    #[serde(default)]
    pub pyramid: PyramidParams,
    #[serde(default)]
    pub compare: CompareParams,
    #[serde(default)]
    pub registrar: RegistrarParams,
    #[serde(default = "enabled")]
    pub find_pyramids: bool,
    #[serde(default = "enabled")]
    pub find_mode_sets: bool,
    #[serde(default = "enabled")]
    pub find_cross_session: bool,
}

impl DiscoveryConfig {
    /// Config for the given pools with every stage enabled and default params.
    pub fn new(pools: Vec<PoolSpec>) -> Self {
        Self {
            pools,
            output_path: None,
            image_root: None,
            classifier: ModeClassifier::default(),
            cluster: ClusterParams::default(),
            mode_sets: ModeSetParams::default(),
            pyramid: PyramidParams::default(),
            compare: CompareParams::default(),
            registrar: RegistrarParams::default(),
            find_pyramids: true,
            find_mode_sets: true,
            find_cross_session: true,
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DiscoverIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), DiscoverIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Resolve the output report path.
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("semgrid_report.json"))
    }

    /// Read every pool, resolving relative record paths against `base_dir`.
    pub fn load_pools(&self, base_dir: &Path) -> Result<Vec<SessionPool>, DiscoverIoError> {
        self.pools
            .iter()
            .map(|spec| {
                let records = load_records(base_dir.join(&spec.records_path))?;
                Ok(SessionPool::new(spec.session_id.clone(), records))
            })
            .collect()
    }
}

/// Load a JSON array of records.
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<ImageRecord>, DiscoverIoError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write records as a pretty JSON array.
pub fn write_records(path: impl AsRef<Path>, records: &[ImageRecord]) -> Result<(), DiscoverIoError> {
    let json = serde_json::to_string_pretty(records)?;
    fs::write(path, json)?;
    Ok(())
}

/// Per-session part of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub records: usize,
    pub clusters: Vec<SceneCluster>,
    /// Records left out of clustering for lack of a stage position.
    #[serde(default)]
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    #[serde(default)]
    pub config_path: Option<String>,
    pub sessions: Vec<SessionSummary>,
    pub collections: Vec<Collection>,
}

impl DiscoveryReport {
    /// Load a report from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DiscoverIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), DiscoverIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: DiscoveryConfig = serde_json::from_str(
            r#"{ "pools": [ { "session_id": "s1", "records_path": "s1.json" } ],
                 "pyramid": { "match_threshold": 0.7 },
                 "find_cross_session": false }"#,
        )
        .unwrap();
        assert_eq!(cfg.pools.len(), 1);
        assert!(cfg.find_pyramids);
        assert!(cfg.find_mode_sets);
        assert!(!cfg.find_cross_session);
        assert_eq!(cfg.pyramid.match_threshold, 0.7);
        assert_eq!(cfg.pyramid.min_magnification_step, 1.5);
        assert_eq!(cfg.cluster, ClusterParams::default());
        assert_eq!(cfg.output_path(), PathBuf::from("semgrid_report.json"));
    }

    #[test]
    fn pools_resolve_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            ImageRecord::new("a.tif", 64, 64).with_center(1.0, 2.0),
            ImageRecord::new("b.tif", 64, 64),
        ];
        write_records(dir.path().join("s1.json"), &records).unwrap();

        let cfg = DiscoveryConfig::new(vec![PoolSpec {
            session_id: "s1".into(),
            records_path: "s1.json".into(),
        }]);
        let pools = cfg.load_pools(dir.path()).unwrap();
        assert_eq!(pools[0].session_id, "s1");
        assert_eq!(pools[0].records, records);

        let missing = DiscoveryConfig::new(vec![PoolSpec {
            session_id: "s2".into(),
            records_path: "nope.json".into(),
        }]);
        assert!(matches!(
            missing.load_pools(dir.path()),
            Err(DiscoverIoError::Io(_))
        ));
    }
}
