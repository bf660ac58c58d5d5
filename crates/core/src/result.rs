//! Result type definition and extension traits.
//!
//! Provides combinators for best-effort operations that must log and continue
//! instead of failing the caller.

use tracing::warn;

use crate::error::Error;

/// The standard Result type for ruleops core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error under `operation` if present.
    fn into_option_logged(self, operation: &str) -> Option<T>;

    /// Inspect the error without consuming the Result.
    #[must_use]
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self, operation: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(operation, error = %e, "Best-effort operation failed");
                None
            }
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
