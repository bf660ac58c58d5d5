//! The advisor: one collect-then-evaluate run plus lifecycle hooks.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use ruleops_core::{ResourceKind, ResourceRecord, ResultExt, Snapshot};
use ruleops_rules::{
    Advice, RuleBaseLoader, SessionConfig, StatelessSession, TracingListener, WorkingMemoryListener,
    DEFAULT_RULE_BASE,
};
use tracing::{debug, info, instrument, Level};

use crate::collector::{CollectorConfig, SnapshotCollector};
use crate::error::{Error, Result};
use crate::source::ResourceSource;

/// Configuration for the advisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisorConfig {
    /// Name of the rule base loaded by `on_start`.
    pub rule_base: String,
    pub collector: CollectorConfig,
    pub session: SessionConfig,
    /// Run one more evaluation from `on_stop`.
    pub final_pass_on_stop: bool,
    /// Dump the StatefulSets visible at start-up to the debug log. Skipped
    /// unless debug logging is enabled; bounded by the collection timeout.
    pub diagnostics_on_start: bool,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            rule_base: DEFAULT_RULE_BASE.to_string(),
            collector: CollectorConfig::default(),
            session: SessionConfig::default(),
            final_pass_on_stop: false,
            diagnostics_on_start: true,
        }
    }
}

/// Something that can produce advice on demand.
#[async_trait]
pub trait AdviceRunner: Send + Sync {
    /// Run once and return the advice.
    async fn evaluate_advice(&self, arg: Option<String>) -> Result<Vec<Advice>>;
}

/// Collects snapshots and evaluates them against one rule base.
///
/// The session is built once by [`Advisor::on_start`] and reused by every
/// run. Runs share nothing else, so an `Arc<Advisor>` may serve concurrent
/// triggers.
pub struct Advisor {
    config: AdvisorConfig,
    collector: SnapshotCollector,
    loader: Arc<dyn RuleBaseLoader>,
    listeners: Vec<Arc<dyn WorkingMemoryListener>>,
    session: OnceLock<StatelessSession>,
}

impl Advisor {
    /// Create an advisor. Nothing is loaded until [`Advisor::on_start`].
    pub fn new(config: AdvisorConfig, source: Arc<dyn ResourceSource>, loader: Arc<dyn RuleBaseLoader>) -> Self {
        let collector = SnapshotCollector::new(source, config.collector.clone());
        Self {
            config,
            collector,
            loader,
            listeners: vec![Arc::new(TracingListener)],
            session: OnceLock::new(),
        }
    }

    /// Attach an extra working memory listener to the session built at start.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn WorkingMemoryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.session.get().is_some()
    }

    /// Load the rule base and build the session.
    ///
    /// Calling it again after a successful start does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the collector configuration is unusable.
    /// - [`Error::RuleBaseLoadFailure`] if the rule base cannot be loaded.
    #[instrument(skip(self), fields(rule_base = %self.config.rule_base))]
    pub async fn on_start(&self) -> Result<()> {
        if self.is_started() {
            debug!("Advisor already started");
            return Ok(());
        }
        self.config.collector.validate()?;

        let base = self
            .loader
            .load(&self.config.rule_base)
            .map_err(|e| Error::rule_base_load_failure(&self.config.rule_base, e.to_string()))?;

        let mut session = StatelessSession::new(base).with_config(self.config.session);
        for listener in &self.listeners {
            session.add_event_listener(Arc::clone(listener));
        }
        let rules = session.rule_base().len();
        if self.session.set(session).is_err() {
            debug!("Session was built concurrently, keeping the first");
        }
        info!(rules, "Advisor started");

        if self.config.diagnostics_on_start && tracing::enabled!(Level::DEBUG) {
            self.log_stateful_sets().await;
        }
        Ok(())
    }

    /// Collect a snapshot and evaluate it.
    ///
    /// # Errors
    ///
    /// [`Error::NotStarted`], or whatever collection or evaluation returns.
    /// Nothing is retried.
    pub async fn evaluate_advice(&self, arg: Option<String>) -> Result<Vec<Advice>> {
        let session = self.session.get().ok_or(Error::NotStarted)?;
        let snapshot = self.collector.collect().await?;
        let advice = Self::evaluate_with(session, &snapshot, arg.as_deref())?;
        info!(
            advice = advice.len(),
            records = snapshot.len(),
            arg = arg.as_deref(),
            "Advisory run complete"
        );
        Ok(advice)
    }

    /// Evaluate an already collected snapshot.
    ///
    /// # Errors
    ///
    /// [`Error::NotStarted`] or [`Error::EvaluationFailed`].
    pub fn evaluate_snapshot(&self, snapshot: &Snapshot, arg: Option<&str>) -> Result<Vec<Advice>> {
        let session = self.session.get().ok_or(Error::NotStarted)?;
        Self::evaluate_with(session, snapshot, arg)
    }

    /// Stop hook: optionally runs one final evaluation.
    ///
    /// # Errors
    ///
    /// Errors of the final pass, if one runs.
    pub async fn on_stop(&self) -> Result<Option<Vec<Advice>>> {
        if !self.config.final_pass_on_stop || !self.is_started() {
            info!("Advisor stopped");
            return Ok(None);
        }
        info!("Running final advisory pass");
        let advice = self.evaluate_advice(None).await?;
        info!(advice = advice.len(), "Advisor stopped");
        Ok(Some(advice))
    }

    fn evaluate_with(session: &StatelessSession, snapshot: &Snapshot, arg: Option<&str>) -> Result<Vec<Advice>> {
        session.evaluate(snapshot, arg).map_err(Error::from)
    }

    /// Best effort: failures and timeouts are logged and ignored.
    async fn log_stateful_sets(&self) {
        let timeout = self.config.collector.timeout;
        let listed = tokio::time::timeout(timeout, self.collector.list_kind(ResourceKind::StatefulSet))
            .await
            .map_err(|_| {
                ruleops_core::Error::source_unavailable(format!(
                    "no answer within {}ms",
                    timeout.as_millis()
                ))
            })
            .and_then(|listed| listed.map_err(|e| ruleops_core::Error::source_unavailable(e.to_string())))
            .into_option_logged("list statefulsets");
        let Some(records) = listed else {
            return;
        };
        let rendered = render_yaml(&records).into_option_logged("render statefulsets");
        if let Some(yaml) = rendered {
            debug!(count = records.len(), "StatefulSets at start-up:\n{yaml}");
        }
    }
}

fn render_yaml(records: &[ResourceRecord]) -> ruleops_core::Result<String> {
    serde_yaml::to_string(records).map_err(|e| ruleops_core::Error::invalid_record(e.to_string()))
}

#[async_trait]
impl AdviceRunner for Advisor {
    async fn evaluate_advice(&self, arg: Option<String>) -> Result<Vec<Advice>> {
        Self::evaluate_advice(self, arg).await
    }
}
