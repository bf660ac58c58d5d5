//! Working memory change listeners.
//!
//! Listeners observe inserts, updates and retractions while rules fire. They
//! are isolated from evaluation: an error or panic raised by a listener is
//! logged and swallowed, never propagated into the firing loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use thiserror::Error;
use tracing::{trace, warn};

use crate::fact::{Fact, FactHandle};

/// Error a listener may report. Never affects evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

/// Result type returned by listener callbacks.
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// A fact was inserted.
#[derive(Debug)]
pub struct ObjectInserted<'a> {
    pub handle: FactHandle,
    pub fact: &'a Fact,
    /// Rule whose action inserted the fact; `None` for caller inserts.
    pub rule: Option<&'a str>,
}

/// A fact was replaced in place.
#[derive(Debug)]
pub struct ObjectUpdated<'a> {
    pub handle: FactHandle,
    pub old: &'a Fact,
    pub new: &'a Fact,
    pub rule: Option<&'a str>,
}

/// A fact was retracted.
#[derive(Debug)]
pub struct ObjectDeleted<'a> {
    pub handle: FactHandle,
    pub old: &'a Fact,
    pub rule: Option<&'a str>,
}

/// Observer of working memory changes.
pub trait WorkingMemoryListener: Send + Sync {
    fn object_inserted(&self, event: &ObjectInserted<'_>) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    fn object_updated(&self, event: &ObjectUpdated<'_>) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    fn object_deleted(&self, event: &ObjectDeleted<'_>) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    /// Name used when reporting listener failures.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Logs every change at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl WorkingMemoryListener for TracingListener {
    fn object_inserted(&self, event: &ObjectInserted<'_>) -> ListenerResult {
        trace!(handle = %event.handle, rule = event.rule, ">>> INSERTED: {}", event.fact);
        Ok(())
    }

    fn object_updated(&self, event: &ObjectUpdated<'_>) -> ListenerResult {
        trace!(handle = %event.handle, rule = event.rule, "><> UPDATED: {}", event.new);
        Ok(())
    }

    fn object_deleted(&self, event: &ObjectDeleted<'_>) -> ListenerResult {
        trace!(handle = %event.handle, rule = event.rule, "<<< DELETED: {}", event.old);
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// The listeners attached to one working memory.
#[derive(Clone, Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Arc<dyn WorkingMemoryListener>>,
}

impl ListenerSet {
    pub(crate) const fn new(listeners: Vec<Arc<dyn WorkingMemoryListener>>) -> Self {
        Self { listeners }
    }

    pub(crate) fn inserted(&self, event: &ObjectInserted<'_>) {
        self.notify(|l| l.object_inserted(event));
    }

    pub(crate) fn updated(&self, event: &ObjectUpdated<'_>) {
        self.notify(|l| l.object_updated(event));
    }

    pub(crate) fn deleted(&self, event: &ObjectDeleted<'_>) {
        self.notify(|l| l.object_deleted(event));
    }

    fn notify<F>(&self, call: F)
    where
        F: Fn(&dyn WorkingMemoryListener) -> ListenerResult,
    {
        for listener in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener = listener.name(), error = %e, "Listener failed, ignoring");
                }
                Err(_) => {
                    warn!(listener = listener.name(), "Listener panicked, ignoring");
                }
            }
        }
    }
}
