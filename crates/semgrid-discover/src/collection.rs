//! Discovery output: typed, immutable groups of records.

use semgrid_core::{FieldOfView, ImageRecord, StagePosition};
use semgrid_register::Alignment;
use serde::{Deserialize, Serialize};

use crate::ModeLabel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// One scene at increasing magnification, each level nested in the previous.
    Pyramid,
    /// One scene under different detector configurations.
    ModeSet,
    /// Comparable images drawn from independent sessions.
    CrossSessionSet,
}

/// One slot of a collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub record: ImageRecord,
    pub mode: ModeLabel,
    /// Match of this record inside the previous entry (pyramids only).
    #[serde(default)]
    pub alignment: Option<Alignment>,
    /// Ids of interchangeable records that could fill this slot.
    #[serde(default)]
    pub alternates: Vec<String>,
    #[serde(default)]
    pub session: Option<String>,
}

impl CollectionEntry {
    pub fn new(record: ImageRecord, mode: ModeLabel) -> Self {
        Self {
            record,
            mode,
            alignment: None,
            alternates: Vec::new(),
            session: None,
        }
    }
}

/// Which acquisition parameters differ between the entries of a mode set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaryingParameters {
    pub high_voltage: bool,
    pub emission_current: bool,
    pub integrations: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    pub mode: Option<String>,
    pub voltage_kv: Option<i64>,
    /// Representative magnification of a cross-session band.
    pub magnification: Option<f64>,
    /// Per-level magnifications of a pyramid.
    pub magnifications: Vec<f64>,
    pub position: Option<StagePosition>,
    pub field_of_view: Option<FieldOfView>,
    pub varying: Option<VaryingParameters>,
    pub description: String,
}

/// A discovered group of records.
///
/// Collections are value objects: nothing in discovery mutates one after
/// it is built. [`Collection::swap_alternate`] returns a new collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub kind: CollectionKind,
    pub id: String,
    pub entries: Vec<CollectionEntry>,
    pub provenance: Provenance,
}

/// Errors from collaborator-facing edits of a collection.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    #[error("entry {index} out of range (collection has {len} entries)")]
    EntryOutOfRange { index: usize, len: usize },
    #[error("{id} is not an alternate of entry {index}")]
    UnknownAlternate { index: usize, id: String },
    #[error("record {id} not found in the pool")]
    MissingRecord { id: String },
}

impl Collection {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.record.id.as_str())
    }

    /// Copy of this collection with `alternate_id` filling entry `index`.
    ///
    /// The displaced record takes the alternate's place in the alternates
    /// list. The entry's alignment is dropped because it was measured for
    /// the displaced record. `pool` supplies the alternate's metadata.
    pub fn swap_alternate(
        &self,
        index: usize,
        alternate_id: &str,
        pool: &[ImageRecord],
    ) -> Result<Collection, CollectionError> {
        let entry = self
            .entries
            .get(index)
            .ok_or(CollectionError::EntryOutOfRange {
                index,
                len: self.entries.len(),
            })?;
        let slot = entry
            .alternates
            .iter()
            .position(|a| a == alternate_id)
            .ok_or_else(|| CollectionError::UnknownAlternate {
                index,
                id: alternate_id.to_string(),
            })?;
        let replacement = pool
            .iter()
            .find(|r| r.id == alternate_id)
            .ok_or_else(|| CollectionError::MissingRecord {
                id: alternate_id.to_string(),
            })?;

        let mut alternates = entry.alternates.clone();
        alternates[slot] = entry.record.id.clone();

        let mut swapped = self.clone();
        swapped.entries[index] = CollectionEntry {
            record: replacement.clone(),
            mode: entry.mode.clone(),
            alignment: None,
            alternates,
            session: entry.session.clone(),
        };
        Ok(swapped)
    }
}
