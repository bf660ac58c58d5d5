//! Facts and globals held in working memory.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use ruleops_core::{ResourceKind, ResourceRecord, ResourceRef};
use serde::{Deserialize, Serialize};

use crate::advice::Advice;

/// Identity of a fact inside one working memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactHandle(u64);

impl FactHandle {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An intermediate fact asserted by one rule for other rules to consume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedFact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<ResourceRef>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl DerivedFact {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: None,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn about(mut self, subject: ResourceRef) -> Self {
        self.subject = Some(subject);
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Everything that can live in working memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Fact {
    Resource(ResourceRecord),
    Advice(Advice),
    Derived(DerivedFact),
}

impl Fact {
    /// The fact's type name: the resource kind, `Advice`, or the derived fact's name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Resource(r) => r.kind().as_str(),
            Self::Advice(_) => "Advice",
            Self::Derived(d) => &d.name,
        }
    }

    #[must_use]
    pub const fn as_resource(&self) -> Option<&ResourceRecord> {
        match self {
            Self::Resource(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_advice(&self) -> Option<&Advice> {
        match self {
            Self::Advice(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_derived(&self) -> Option<&DerivedFact> {
        match self {
            Self::Derived(d) => Some(d),
            _ => None,
        }
    }
}

impl From<ResourceRecord> for Fact {
    fn from(record: ResourceRecord) -> Self {
        Self::Resource(record)
    }
}

impl From<Advice> for Fact {
    fn from(advice: Advice) -> Self {
        Self::Advice(advice)
    }
}

impl From<DerivedFact> for Fact {
    fn from(derived: DerivedFact) -> Self {
        Self::Derived(derived)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(r) => write!(f, "{}", r.resource_ref()),
            Self::Advice(a) => write!(f, "Advice{a}"),
            Self::Derived(d) => match &d.subject {
                Some(subject) => write!(f, "{}({subject})", d.name),
                None => write!(f, "{}", d.name),
            },
        }
    }
}

/// The partition of working memory a fact lives in.
///
/// Working memory tracks when each slot last changed, so a rule that
/// declares which slots it reads is only re-matched after one of them moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FactSlot {
    Resource(ResourceKind),
    Advice,
    Derived,
}

impl Fact {
    #[must_use]
    pub fn slot(&self) -> FactSlot {
        match self {
            Self::Resource(r) => FactSlot::Resource(r.kind()),
            Self::Advice(_) => FactSlot::Advice,
            Self::Derived(_) => FactSlot::Derived,
        }
    }
}

impl From<ResourceKind> for FactSlot {
    fn from(kind: ResourceKind) -> Self {
        Self::Resource(kind)
    }
}

/// Selects facts out of working memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactFilter {
    All,
    Advice,
    /// Resources, optionally of one kind.
    Resource(Option<ResourceKind>),
    /// Derived facts with the given name.
    Derived(String),
}

impl FactFilter {
    #[must_use]
    pub fn matches(&self, fact: &Fact) -> bool {
        match (self, fact) {
            (Self::All, _) | (Self::Advice, Fact::Advice(_)) | (Self::Resource(None), Fact::Resource(_)) => {
                true
            }
            (Self::Resource(Some(kind)), Fact::Resource(r)) => r.kind() == *kind,
            (Self::Derived(name), Fact::Derived(d)) => d.name == *name,
            _ => false,
        }
    }
}

/// A named scalar visible to rule conditions and actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GlobalValue {
    Timestamp(DateTime<Utc>),
    Number(i64),
    Flag(bool),
    Text(String),
}

impl GlobalValue {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

/// The named globals of one working memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Globals(BTreeMap<String, GlobalValue>);

impl Globals {
    pub(crate) fn set(&mut self, name: String, value: GlobalValue) {
        self.0.insert(name, value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&GlobalValue> {
        self.0.get(name)
    }

    /// A text global, if bound and textual.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(GlobalValue::as_text)
    }

    /// A timestamp global, if bound and a timestamp.
    #[must_use]
    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).and_then(GlobalValue::as_timestamp)
    }
}

impl From<&str> for GlobalValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for GlobalValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for GlobalValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}
