//! Point-in-time snapshot of cluster resources.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::resource::{ResourceKind, ResourceRecord};

/// An unordered collection of records assembled once per evaluation run.
///
/// A snapshot is only ever built whole through [`SnapshotBuilder`]; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    taken_at: DateTime<Utc>,
    records: Vec<ResourceRecord>,
    counts: BTreeMap<ResourceKind, usize>,
    omitted: Vec<ResourceKind>,
}

impl Snapshot {
    /// A snapshot with no records.
    #[must_use]
    pub const fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            records: Vec::new(),
            counts: BTreeMap::new(),
            omitted: Vec::new(),
        }
    }

    /// Build a snapshot directly from records, grouping counts by kind.
    #[must_use]
    pub fn from_records(taken_at: DateTime<Utc>, records: Vec<ResourceRecord>) -> Self {
        let counts = records.iter().counts_by(ResourceRecord::kind).into_iter().collect();
        Self {
            taken_at,
            records,
            counts,
            omitted: Vec::new(),
        }
    }

    /// When collection started.
    #[must_use]
    pub const fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    #[must_use]
    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<ResourceRecord> {
        self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records collected for `kind` (zero when the kind was empty or not collected).
    #[must_use]
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Per-kind counts for every kind that was collected.
    #[must_use]
    pub const fn counts(&self) -> &BTreeMap<ResourceKind, usize> {
        &self.counts
    }

    /// Kinds whose fetch failed and were left out under an omit policy.
    #[must_use]
    pub fn omitted_kinds(&self) -> &[ResourceKind] {
        &self.omitted
    }

    /// Records of a single kind.
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceRecord> {
        self.records.iter().filter(move |r| r.kind() == kind)
    }
}

/// Accumulates per-kind results into a [`Snapshot`].
#[derive(Debug)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
}

impl SnapshotBuilder {
    /// Start a snapshot taken at `taken_at`.
    #[must_use]
    pub const fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            snapshot: Snapshot::empty(taken_at),
        }
    }

    /// Append one kind's records. An empty batch still registers the kind with a zero count.
    pub fn add_kind(&mut self, kind: ResourceKind, records: Vec<ResourceRecord>) -> &mut Self {
        let entry = self.snapshot.counts.entry(kind).or_insert(0);
        *entry = entry.saturating_add(records.len());
        self.snapshot.records.extend(records);
        self
    }

    /// Record that `kind` was left out.
    pub fn omit(&mut self, kind: ResourceKind) -> &mut Self {
        if !self.snapshot.omitted.contains(&kind) {
            self.snapshot.omitted.push(kind);
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Snapshot {
        self.snapshot
    }
}
