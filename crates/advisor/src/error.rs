//! Error types for the advisor crate.

use std::fmt;
use std::time::Duration;

use ruleops_core::ResourceKind;

/// Result type alias for advisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Advisor error types.
///
/// An advisory run yields either a (possibly empty) advice list or exactly
/// one of these; partial results are never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A resource source failed to list one kind.
    AdapterFailure { kind: ResourceKind, reason: String },
    /// Collection did not finish within the timeout.
    SnapshotTimeout { timeout_ms: u64 },
    /// The configured rule base could not be loaded.
    RuleBaseLoadFailure { name: String, reason: String },
    /// A rule action failed or the firing limit was hit.
    EvaluationFailed { reason: String },
    /// Advice was requested before `on_start`.
    NotStarted,
    /// The scheduled loop gave up after too many consecutive failures.
    LoopAborted { consecutive_errors: usize },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterFailure { kind, reason } => {
                write!(f, "failed to list {kind}: {reason}")
            }
            Self::SnapshotTimeout { timeout_ms } => {
                write!(f, "snapshot collection timed out after {timeout_ms}ms")
            }
            Self::RuleBaseLoadFailure { name, reason } => {
                write!(f, "failed to load rule base '{name}': {reason}")
            }
            Self::EvaluationFailed { reason } => {
                write!(f, "evaluation failed: {reason}")
            }
            Self::NotStarted => {
                write!(f, "advisor not started: call on_start first")
            }
            Self::LoopAborted { consecutive_errors } => {
                write!(f, "advisory loop aborted after {consecutive_errors} consecutive errors")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create an adapter failure error.
    pub fn adapter_failure(kind: ResourceKind, reason: impl Into<String>) -> Self {
        Self::AdapterFailure {
            kind,
            reason: reason.into(),
        }
    }

    /// Create a snapshot timeout error.
    #[must_use]
    pub fn snapshot_timeout(timeout: Duration) -> Self {
        Self::SnapshotTimeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a rule base load error.
    pub fn rule_base_load_failure(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuleBaseLoadFailure {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an evaluation failed error.
    pub fn evaluation_failed(reason: impl Into<String>) -> Self {
        Self::EvaluationFailed {
            reason: reason.into(),
        }
    }

    /// Create a loop aborted error.
    #[must_use]
    pub const fn loop_aborted(consecutive_errors: usize) -> Self {
        Self::LoopAborted { consecutive_errors }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<ruleops_rules::Error> for Error {
    fn from(err: ruleops_rules::Error) -> Self {
        Self::evaluation_failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::adapter_failure(ResourceKind::Pod, "connection refused");
        assert!(err.to_string().contains("Pod"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_snapshot_timeout_in_millis() {
        let err = Error::snapshot_timeout(Duration::from_secs(10));
        assert_eq!(err, Error::SnapshotTimeout { timeout_ms: 10_000 });
        assert!(err.to_string().contains("10000ms"));
    }

    #[test]
    fn test_rules_error_maps_to_evaluation_failed() {
        let err: Error = ruleops_rules::Error::action_failed("stuck-pod", "boom").into();
        assert!(matches!(err, Error::EvaluationFailed { ref reason } if reason.contains("stuck-pod")));
    }
}
