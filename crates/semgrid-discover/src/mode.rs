//! Acquisition-mode labels derived from raw detector metadata.
//!
//! A label combines the detector configuration with the accelerating
//! voltage, e.g. `bsd_15kv` or `topo-h_10kv`. The same detector at two
//! voltages is a different acquisition and gets a different label.

use std::fmt;

use semgrid_core::ImageRecord;
use serde::{Deserialize, Serialize};

/// Detector configuration, before the voltage suffix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DetectorMode {
    Sed,
    Bsd,
    /// Mixed segments weighted for horizontal relief (~136°).
    TopoHorizontal,
    /// Mixed segments weighted for vertical relief (~44°).
    TopoVertical,
    Topo,
    /// Derived chemical overlay product.
    ChemSem,
    /// Any other detector, by lower-cased name (`unknown` when absent).
    Other(String),
}

impl DetectorMode {
    pub fn key(&self) -> &str {
        match self {
            DetectorMode::Sed => "sed",
            DetectorMode::Bsd => "bsd",
            DetectorMode::TopoHorizontal => "topo-h",
            DetectorMode::TopoVertical => "topo-v",
            DetectorMode::Topo => "topo",
            DetectorMode::ChemSem => "chemsem",
            DetectorMode::Other(name) => name,
        }
    }

    pub fn display(&self) -> String {
        match self {
            DetectorMode::Sed => "SED".into(),
            DetectorMode::Bsd => "BSD".into(),
            DetectorMode::TopoHorizontal => "Topo 136°".into(),
            DetectorMode::TopoVertical => "Topo 44°".into(),
            DetectorMode::Topo => "Topo".into(),
            DetectorMode::ChemSem => "ChemSEM".into(),
            DetectorMode::Other(name) if name.starts_with("topo") => "Topo".into(),
            DetectorMode::Other(name) => name.to_uppercase(),
        }
    }
}

/// How a mixed-segment configuration is resolved into a topography variant.
///
/// The segment-dominance rule is an instrument-specific heuristic whose
/// angle assignment has not been verified against ground truth; swap the
/// strategy rather than editing callers when another instrument needs a
/// different rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixStrategy {
    /// `|B|>|A| && |C|>|D|` is horizontal, `|A|>|B| && |D|>|C|` is
    /// vertical, anything else is generic topography. Missing weights
    /// count as zero.
    #[default]
    SegmentDominance,
    /// Every mixed configuration is generic topography.
    GenericTopography,
}

impl MixStrategy {
    pub fn resolve(&self, factors: Option<[f64; 4]>) -> DetectorMode {
        match self {
            MixStrategy::GenericTopography => DetectorMode::Topo,
            MixStrategy::SegmentDominance => {
                let [a, b, c, d] = factors.unwrap_or_default().map(f64::abs);
                if b > a && c > d {
                    DetectorMode::TopoHorizontal
                } else if a > b && d > c {
                    DetectorMode::TopoVertical
                } else {
                    DetectorMode::Topo
                }
            }
        }
    }
}

/// Canonical mode key plus its human-readable form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModeLabel {
    /// Scene-distinguishing key, e.g. `sed_15kv`.
    pub key: String,
    /// Detector part of the key, e.g. `sed`.
    pub mode: String,
    /// Accelerating voltage rounded to whole kV, sign stripped.
    pub voltage_kv: Option<i64>,
    /// Display form, e.g. `SED 15 kV`.
    pub display: String,
}

impl ModeLabel {
    pub fn new(mode: &DetectorMode, high_voltage_kv: Option<f64>) -> Self {
        let voltage_kv = high_voltage_kv
            .filter(|v| v.is_finite())
            .map(|v| v.abs().round() as i64);
        let (key, display) = match voltage_kv {
            Some(kv) => (
                format!("{}_{kv}kv", mode.key()),
                format!("{} {kv} kV", mode.display()),
            ),
            None => (mode.key().to_string(), mode.display()),
        };
        Self {
            key,
            mode: mode.key().to_string(),
            voltage_kv,
            display,
        }
    }
}

impl fmt::Display for ModeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Stateless mapping from a record's detector fields to a [`ModeLabel`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeClassifier {
    pub mix: MixStrategy,
}

impl ModeClassifier {
    pub fn new(mix: MixStrategy) -> Self {
        Self { mix }
    }

    /// Detector mode of a record, without voltage.
    ///
    /// Overlays are checked first: they carry a foreign detector signature
    /// but must never be mistaken for a primary reading.
    pub fn detector_mode(&self, record: &ImageRecord) -> DetectorMode {
        if record.is_overlay() {
            return DetectorMode::ChemSem;
        }
        let name = record
            .detector
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_ascii_lowercase);
        match name.as_deref() {
            Some("sed") => DetectorMode::Sed,
            Some("bsd" | "bsd-all") => DetectorMode::Bsd,
            Some("mix") => self.mix.resolve(record.detector.mix_factors),
            Some(other) => DetectorMode::Other(other.to_string()),
            None => DetectorMode::Other("unknown".to_string()),
        }
    }

    pub fn classify(&self, record: &ImageRecord) -> ModeLabel {
        ModeLabel::new(&self.detector_mode(record), record.detector.high_voltage_kv)
    }
}

/// A record with its label computed once for this discovery pass.
#[derive(Clone, Debug)]
pub struct Labeled<'a> {
    pub record: &'a ImageRecord,
    pub label: ModeLabel,
}

impl<'a> Labeled<'a> {
    pub fn all(classifier: &ModeClassifier, records: &'a [ImageRecord]) -> Vec<Labeled<'a>> {
        records
            .iter()
            .map(|record| Labeled {
                record,
                label: classifier.classify(record),
            })
            .collect()
    }
}

/// Position of `mode` in a preferred ordering, matched by prefix.
///
/// Modes matching no entry sort last.
pub fn preferred_rank(order: &[String], mode: &str) -> usize {
    order
        .iter()
        .position(|p| mode.starts_with(p.as_str()))
        .unwrap_or(usize::MAX)
}
