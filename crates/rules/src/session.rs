//! Stateless sessions: one fresh working memory per execution.

use std::sync::Arc;

use ruleops_core::Snapshot;
use tracing::{debug, instrument};

use crate::advice::Advice;
use crate::base::RuleBase;
use crate::command::{BatchExecution, Command, ExecutionResults, ResultValue};
use crate::engine::{self, FiringLimit};
use crate::error::Result;
use crate::fact::{Fact, FactFilter};
use crate::listener::{ListenerSet, WorkingMemoryListener};
use crate::memory::WorkingMemory;

/// Identifier the advice list is stored under.
pub const ADVICES: &str = "advices";

/// Global holding the caller's optional argument.
pub const ARG0: &str = "arg0";

/// Global holding the snapshot instant.
pub const NOW: &str = "now";

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// Firing budget of a `FireAllRules` without an explicit maximum.
    pub firing_limit: FiringLimit,
}

/// A session bound to one rule base.
///
/// Holds no facts between executions, so a single session can be shared
/// across threads and runs.
#[derive(Clone)]
pub struct StatelessSession {
    base: Arc<RuleBase>,
    config: SessionConfig,
    listeners: Vec<Arc<dyn WorkingMemoryListener>>,
}

impl StatelessSession {
    #[must_use]
    pub fn new(base: Arc<RuleBase>) -> Self {
        Self {
            base,
            config: SessionConfig::default(),
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a listener to every future execution.
    pub fn add_event_listener(&mut self, listener: Arc<dyn WorkingMemoryListener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn rule_base(&self) -> &Arc<RuleBase> {
        &self.base
    }

    #[must_use]
    pub const fn config(&self) -> SessionConfig {
        self.config
    }

    /// Run a batch against a fresh working memory.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a `FireAllRules` command. Nothing
    /// produced by the batch is returned in that case.
    pub fn execute(&self, batch: BatchExecution) -> Result<ExecutionResults> {
        let mut memory = WorkingMemory::with_listeners(ListenerSet::new(self.listeners.clone()));
        let mut results = ExecutionResults::default();

        for command in batch.commands() {
            match command {
                Command::SetGlobal { identifier, value } => {
                    memory.set_global(identifier.clone(), value.clone());
                }
                Command::InsertElements(facts) => {
                    for fact in facts {
                        memory.insert(fact.clone());
                    }
                }
                Command::FireAllRules { max, out_identifier } => {
                    let limit = max.map_or(self.config.firing_limit, FiringLimit::Fixed);
                    let fired = engine::fire_all_rules(&self.base, &mut memory, limit)?;
                    if let Some(id) = out_identifier {
                        results.insert(id.clone(), ResultValue::FiredCount(fired));
                    }
                }
                Command::GetObjects { filter, out_identifier } => {
                    results.insert(out_identifier.clone(), ResultValue::Facts(memory.objects(filter)));
                }
            }
        }

        Ok(results)
    }

    /// Evaluate a snapshot and return the advice the rules asserted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ActionFailed`](crate::Error::ActionFailed) or
    /// [`Error::FiringLimitExceeded`](crate::Error::FiringLimitExceeded).
    #[instrument(skip(self, snapshot), fields(rule_base = %self.base.name(), facts = snapshot.len()))]
    pub fn evaluate(&self, snapshot: &Snapshot, arg: Option<&str>) -> Result<Vec<Advice>> {
        let batch = advice_batch(snapshot, arg);
        let results = self.execute(batch)?;
        let advice = results.advice(ADVICES);
        debug!(advice = advice.len(), "Evaluation complete");
        Ok(advice)
    }
}

/// The fixed batch used for snapshot evaluation: `arg0` (if any), `now`,
/// the snapshot's records, fire, then collect advice.
#[must_use]
pub fn advice_batch(snapshot: &Snapshot, arg: Option<&str>) -> BatchExecution {
    let mut batch = BatchExecution::new();
    if let Some(arg) = arg {
        batch.push(Command::set_global(ARG0, arg));
    }
    batch.push(Command::set_global(NOW, snapshot.taken_at()));
    batch.push(Command::InsertElements(
        snapshot.records().iter().cloned().map(Fact::from).collect(),
    ));
    batch.push(Command::fire_all_rules());
    batch.push(Command::get_objects(FactFilter::Advice, ADVICES));
    batch
}

/// Evaluate a snapshot with a throwaway session.
///
/// # Errors
///
/// See [`StatelessSession::evaluate`].
pub fn evaluate(base: Arc<RuleBase>, snapshot: &Snapshot, arg: Option<&str>) -> Result<Vec<Advice>> {
    StatelessSession::new(base).evaluate(snapshot, arg)
}
