//! Working memory: the per-run fact store.
//!
//! Besides the facts themselves, memory keeps the indexes the engine needs to
//! avoid rescanning everything after each firing: facts per [`FactSlot`],
//! resources by kind, namespace and name, the revision at which each slot
//! last changed, and a log of inserted or updated handles.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use ruleops_core::{ResourceKind, ResourceRecord};

use crate::advice::Advice;
use crate::error::{Error, Result};
use crate::fact::{Fact, FactFilter, FactHandle, FactSlot, GlobalValue, Globals};
use crate::listener::{ListenerSet, ObjectDeleted, ObjectInserted, ObjectUpdated};

#[derive(Debug, Clone)]
struct StoredFact {
    fact: Fact,
    version: u64,
}

/// A pending change produced by a rule action.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    Insert(Fact),
    Update(FactHandle, Fact),
    Retract(FactHandle),
}

type NameKey = (ResourceKind, Option<String>, String);

fn name_key(record: &ResourceRecord) -> NameKey {
    (
        record.kind(),
        record.namespace().map(str::to_string),
        record.name().to_string(),
    )
}

/// Facts and globals for exactly one evaluation run.
///
/// Facts are keyed by [`FactHandle`] and iterate in insertion order. Every
/// update bumps the fact's version so refraction can tell a modified fact
/// from one a rule has already seen.
pub struct WorkingMemory {
    facts: BTreeMap<FactHandle, StoredFact>,
    globals: Globals,
    next_handle: u64,
    listeners: ListenerSet,
    by_slot: BTreeMap<FactSlot, BTreeSet<FactHandle>>,
    by_name: BTreeMap<NameKey, BTreeSet<FactHandle>>,
    revision: u64,
    slot_changed: BTreeMap<FactSlot, u64>,
    globals_changed: u64,
    log: Vec<FactHandle>,
}

impl WorkingMemory {
    /// Create an empty working memory without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::with_listeners(ListenerSet::default())
    }

    pub(crate) fn with_listeners(listeners: ListenerSet) -> Self {
        Self {
            facts: BTreeMap::new(),
            globals: Globals::default(),
            next_handle: 0,
            listeners,
            by_slot: BTreeMap::new(),
            by_name: BTreeMap::new(),
            revision: 0,
            slot_changed: BTreeMap::new(),
            globals_changed: 0,
            log: Vec::new(),
        }
    }

    /// Bind a named global.
    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<GlobalValue>) {
        self.globals.set(name.into(), value.into());
        self.revision = self.revision.saturating_add(1);
        self.globals_changed = self.revision;
    }

    #[must_use]
    pub const fn globals(&self) -> &Globals {
        &self.globals
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<&GlobalValue> {
        self.globals.get(name)
    }

    /// A text global, if bound and textual.
    #[must_use]
    pub fn global_text(&self, name: &str) -> Option<&str> {
        self.globals.text(name)
    }

    /// A timestamp global, if bound and a timestamp.
    #[must_use]
    pub fn global_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.globals.timestamp(name)
    }

    /// Insert a fact on behalf of the caller.
    pub fn insert(&mut self, fact: impl Into<Fact>) -> FactHandle {
        self.insert_from(fact.into(), None)
    }

    /// Replace a live fact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FactNotFound`] if the handle is not live.
    pub fn update(&mut self, handle: FactHandle, fact: impl Into<Fact>) -> Result<()> {
        self.update_from(handle, fact.into(), None)
    }

    /// Remove a live fact and return it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FactNotFound`] if the handle is not live.
    pub fn retract(&mut self, handle: FactHandle) -> Result<Fact> {
        self.retract_from(handle, None)
    }

    #[must_use]
    pub fn get(&self, handle: FactHandle) -> Option<&Fact> {
        self.facts.get(&handle).map(|s| &s.fact)
    }

    /// Current version of a live fact.
    #[must_use]
    pub fn version(&self, handle: FactHandle) -> Option<u64> {
        self.facts.get(&handle).map(|s| s.version)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// All live facts in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (FactHandle, &Fact)> {
        self.facts.iter().map(|(h, s)| (*h, &s.fact))
    }

    /// Live facts of one slot in handle order.
    pub fn in_slot(&self, slot: FactSlot) -> impl Iterator<Item = (FactHandle, &Fact)> {
        self.by_slot
            .get(&slot)
            .into_iter()
            .flatten()
            .filter_map(|h| self.get(*h).map(|f| (*h, f)))
    }

    /// Live resources of one kind in handle order.
    pub fn resources(&self, kind: ResourceKind) -> impl Iterator<Item = (FactHandle, &ResourceRecord)> {
        self.in_slot(FactSlot::Resource(kind))
            .filter_map(|(h, f)| f.as_resource().map(|r| (h, r)))
    }

    /// Live resources with this kind, namespace and name.
    pub fn named(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> impl Iterator<Item = (FactHandle, &ResourceRecord)> {
        let key = (kind, namespace.map(str::to_string), name.to_string());
        self.by_name
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|h| self.get(*h).and_then(Fact::as_resource).map(|r| (*h, r)))
    }

    /// Whether a resource with this kind, namespace and name is live.
    #[must_use]
    pub fn has_resource(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> bool {
        self.named(kind, namespace, name).next().is_some()
    }

    /// Live advice in handle order.
    pub fn advice(&self) -> impl Iterator<Item = (FactHandle, &Advice)> {
        self.in_slot(FactSlot::Advice)
            .filter_map(|(h, f)| f.as_advice().map(|a| (h, a)))
    }

    /// Clones of every live fact accepted by `filter`, in handle order.
    #[must_use]
    pub fn objects(&self, filter: &FactFilter) -> Vec<Fact> {
        self.iter()
            .filter(|(_, f)| filter.matches(f))
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Counter bumped by every change to facts or globals.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Revision of the last change to `slot`, or 0 if it never changed.
    #[must_use]
    pub fn slot_changed_at(&self, slot: FactSlot) -> u64 {
        self.slot_changed.get(&slot).copied().unwrap_or(0)
    }

    /// Revision of the last `set_global`, or 0.
    #[must_use]
    pub const fn globals_changed_at(&self) -> u64 {
        self.globals_changed
    }

    /// Handles inserted or updated since position `from` of the change log.
    pub(crate) fn changed_since(&self, from: usize) -> &[FactHandle] {
        self.log.get(from..).unwrap_or_default()
    }

    pub(crate) fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Apply a rule's changes in the order the action issued them.
    pub(crate) fn apply(&mut self, changes: Vec<Change>, rule: &str) -> Result<()> {
        for change in changes {
            match change {
                Change::Insert(fact) => {
                    self.insert_from(fact, Some(rule));
                }
                Change::Update(handle, fact) => self.update_from(handle, fact, Some(rule))?,
                Change::Retract(handle) => {
                    self.retract_from(handle, Some(rule))?;
                }
            }
        }
        Ok(())
    }

    fn touch(&mut self, slot: FactSlot) {
        self.revision = self.revision.saturating_add(1);
        self.slot_changed.insert(slot, self.revision);
    }

    fn index(&mut self, handle: FactHandle, fact: &Fact) {
        self.by_slot.entry(fact.slot()).or_default().insert(handle);
        if let Some(record) = fact.as_resource() {
            self.by_name.entry(name_key(record)).or_default().insert(handle);
        }
    }

    fn unindex(&mut self, handle: FactHandle, fact: &Fact) {
        if let Some(handles) = self.by_slot.get_mut(&fact.slot()) {
            handles.remove(&handle);
        }
        if let Some(record) = fact.as_resource() {
            let key = name_key(record);
            let emptied = self.by_name.get_mut(&key).is_some_and(|handles| {
                handles.remove(&handle);
                handles.is_empty()
            });
            if emptied {
                self.by_name.remove(&key);
            }
        }
    }

    fn insert_from(&mut self, fact: Fact, rule: Option<&str>) -> FactHandle {
        let handle = FactHandle::new(self.next_handle);
        self.next_handle = self.next_handle.saturating_add(1);
        self.listeners.inserted(&ObjectInserted {
            handle,
            fact: &fact,
            rule,
        });
        self.index(handle, &fact);
        self.touch(fact.slot());
        self.log.push(handle);
        self.facts.insert(handle, StoredFact { fact, version: 0 });
        handle
    }

    fn update_from(&mut self, handle: FactHandle, fact: Fact, rule: Option<&str>) -> Result<()> {
        let stored = self
            .facts
            .get_mut(&handle)
            .ok_or_else(|| Error::fact_not_found(handle))?;
        let old = std::mem::replace(&mut stored.fact, fact);
        stored.version = stored.version.saturating_add(1);
        let new = stored.fact.clone();
        self.listeners.updated(&ObjectUpdated {
            handle,
            old: &old,
            new: &new,
            rule,
        });
        self.unindex(handle, &old);
        self.index(handle, &new);
        self.touch(old.slot());
        self.touch(new.slot());
        self.log.push(handle);
        Ok(())
    }

    fn retract_from(&mut self, handle: FactHandle, rule: Option<&str>) -> Result<Fact> {
        let stored = self
            .facts
            .remove(&handle)
            .ok_or_else(|| Error::fact_not_found(handle))?;
        self.listeners.deleted(&ObjectDeleted {
            handle,
            old: &stored.fact,
            rule,
        });
        self.unindex(handle, &stored.fact);
        self.touch(stored.fact.slot());
        Ok(stored.fact)
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}
