//! Advice: the output fact rules assert.

use std::fmt;

use ruleops_core::ResourceRef;
use serde::{Deserialize, Serialize};

/// How urgent a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One advisory finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Advice {
    /// Short machine-friendly category, e.g. `StuckPod`.
    pub category: String,
    /// Human-readable explanation.
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    /// Name of the rule that asserted this advice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Resources that triggered the finding.
    #[serde(default)]
    pub references: Vec<ResourceRef>,
}

impl Advice {
    /// Create advice with a category and message.
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            severity: Severity::default(),
            rule: None,
            references: Vec::new(),
        }
    }

    /// Set the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Add a resource reference.
    #[must_use]
    pub fn referencing(mut self, resource: ResourceRef) -> Self {
        self.references.push(resource);
        self
    }

    /// Record the asserting rule.
    #[must_use]
    pub fn from_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// The first referenced resource, if any.
    #[must_use]
    pub fn primary_ref(&self) -> Option<&ResourceRef> {
        self.references.first()
    }
}

impl fmt::Display for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.category, self.message)?;
        if let Some(target) = self.primary_ref() {
            write!(f, " ({target})")?;
        }
        Ok(())
    }
}
