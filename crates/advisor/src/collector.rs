//! Snapshot collection.
//!
//! One blocking listing per configured kind runs on the tokio blocking pool.
//! All listings start together and are merged in completion order under a
//! single deadline. If the deadline passes, collection fails and the
//! outstanding listings are abandoned; their results are dropped when they
//! eventually finish.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use itertools::Itertools;
use ruleops_core::{ResourceKind, ResourceRecord, ResourceScope, Snapshot, SnapshotBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::source::ResourceSource;

/// Default collection deadline.
pub const DEFAULT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// What to do when one kind fails to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFailurePolicy {
    /// Fail the whole collection.
    #[default]
    Abort,
    /// Leave the kind out of the snapshot and carry on.
    Omit,
}

/// Configuration for the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Deadline for the whole collection.
    pub timeout: Duration,
    /// Namespace for kinds listed per namespace.
    pub namespace: String,
    /// Kinds to collect.
    pub kinds: Vec<ResourceKind>,
    /// Per-kind scope overrides.
    pub scopes: BTreeMap<ResourceKind, ResourceScope>,
    pub failure_policy: SourceFailurePolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COLLECTION_TIMEOUT,
            namespace: "default".to_string(),
            kinds: ResourceKind::ALL.to_vec(),
            scopes: BTreeMap::new(),
            failure_policy: SourceFailurePolicy::default(),
        }
    }
}

impl CollectorConfig {
    /// The scope `kind` is listed in.
    #[must_use]
    pub fn scope_for(&self, kind: ResourceKind) -> ResourceScope {
        self.scopes
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_scope(&self.namespace))
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero timeout, an empty
    /// namespace, or a kind listed more than once.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::invalid_config("collection timeout must be greater than zero"));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::invalid_config("namespace must not be empty"));
        }
        if let Some(kind) = self.kinds.iter().duplicates().next() {
            return Err(Error::invalid_config(format!("kind {kind} is listed more than once")));
        }
        Ok(())
    }
}

type Listing = (ResourceKind, ruleops_core::Result<Vec<ResourceRecord>>);

/// Builds snapshots from a resource source.
#[derive(Clone)]
pub struct SnapshotCollector {
    source: Arc<dyn ResourceSource>,
    config: CollectorConfig,
}

impl SnapshotCollector {
    /// Create a new collector.
    pub fn new(source: Arc<dyn ResourceSource>, config: CollectorConfig) -> Self {
        Self { source, config }
    }

    #[must_use]
    pub const fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Collect one snapshot of every configured kind.
    ///
    /// # Errors
    ///
    /// - [`Error::SnapshotTimeout`] if the deadline passes first.
    /// - [`Error::AdapterFailure`] if a kind fails under the abort policy.
    pub async fn collect(&self) -> Result<Snapshot> {
        let taken_at = Utc::now();
        let timeout = self.config.timeout;

        let pending: FuturesUnordered<_> = self
            .config
            .kinds
            .iter()
            .unique()
            .map(|&kind| self.spawn_listing(kind))
            .collect();

        let snapshot = tokio::time::timeout(timeout, self.merge(pending, SnapshotBuilder::new(taken_at)))
            .await
            .map_err(|_| {
                warn!(timeout_ms = timeout.as_millis(), "Snapshot collection timed out");
                Error::snapshot_timeout(timeout)
            })??;

        info!(
            records = snapshot.len(),
            omitted = snapshot.omitted_kinds().len(),
            source = self.source.name(),
            "Snapshot collected"
        );
        Ok(snapshot)
    }

    /// List a single kind in its configured scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterFailure`] if the source fails.
    pub async fn list_kind(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>> {
        let (kind, listed) = self.spawn_listing(kind).await;
        listed.map_err(|e| Error::adapter_failure(kind, e.to_string()))
    }

    /// Start a listing on the blocking pool immediately.
    fn spawn_listing(&self, kind: ResourceKind) -> impl Future<Output = Listing> + Send + 'static {
        let source = Arc::clone(&self.source);
        let scope = self.config.scope_for(kind);
        debug!(kind = %kind, scope = %scope, "Listing resources");
        tokio::task::spawn_blocking(move || source.list(kind, &scope)).map(move |joined| {
            let listed = joined.unwrap_or_else(|e| {
                Err(ruleops_core::Error::source_unavailable(format!("listing task failed: {e}")))
            });
            (kind, listed)
        })
    }

    async fn merge<F>(&self, mut pending: FuturesUnordered<F>, mut builder: SnapshotBuilder) -> Result<Snapshot>
    where
        F: Future<Output = Listing>,
    {
        while let Some((kind, listed)) = pending.next().await {
            match listed {
                Ok(records) => {
                    debug!(kind = %kind, count = records.len(), "Collected resources");
                    builder.add_kind(kind, records);
                }
                Err(e) => match self.config.failure_policy {
                    SourceFailurePolicy::Abort => {
                        warn!(kind = %kind, error = %e, "Listing failed, aborting collection");
                        return Err(Error::adapter_failure(kind, e.to_string()));
                    }
                    SourceFailurePolicy::Omit => {
                        warn!(kind = %kind, error = %e, "Listing failed, omitting kind");
                        builder.omit(kind);
                    }
                },
            }
        }
        Ok(builder.build())
    }
}
