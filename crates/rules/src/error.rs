//! Error types for the rules crate.

use thiserror::Error;

/// Result type alias for rule engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Rule engine error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No rule base registered under the requested name.
    #[error("rule base '{name}' not found")]
    RuleBaseNotFound { name: String },

    /// The rule base could not be built.
    #[error("rule base '{name}' is invalid: {reason}")]
    RuleBaseInvalid { name: String, reason: String },

    /// A rule action returned an error while firing.
    #[error("rule '{rule}' failed: {reason}")]
    ActionFailed { rule: String, reason: String },

    /// Firing did not reach a fixpoint within the configured limit.
    #[error("firing limit of {limit} activations exceeded")]
    FiringLimitExceeded { limit: usize },

    /// A fact handle does not refer to a live fact.
    #[error("fact {handle} not found in working memory")]
    FactNotFound { handle: String },

    /// A rule action produced an unusable fact.
    #[error("invalid fact: {reason}")]
    InvalidFact { reason: String },
}

impl Error {
    /// Create a rule base not found error.
    pub fn rule_base_not_found(name: impl Into<String>) -> Self {
        Self::RuleBaseNotFound { name: name.into() }
    }

    /// Create a rule base invalid error.
    pub fn rule_base_invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuleBaseInvalid {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an action failed error.
    pub fn action_failed(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActionFailed {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Create a firing limit error.
    #[must_use]
    pub const fn firing_limit_exceeded(limit: usize) -> Self {
        Self::FiringLimitExceeded { limit }
    }

    /// Create a fact not found error.
    pub fn fact_not_found(handle: impl ToString) -> Self {
        Self::FactNotFound {
            handle: handle.to_string(),
        }
    }

    /// Create an invalid fact error.
    pub fn invalid_fact(reason: impl Into<String>) -> Self {
        Self::InvalidFact {
            reason: reason.into(),
        }
    }
}
