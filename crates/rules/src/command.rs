//! Batch commands executed by a [`StatelessSession`](crate::session::StatelessSession).
//!
//! A batch is an ordered list of commands run against one fresh working
//! memory. Commands that produce output store it under an identifier in
//! [`ExecutionResults`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::advice::Advice;
use crate::fact::{Fact, FactFilter, GlobalValue};

/// One step of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Bind a global before facts are inserted.
    SetGlobal { identifier: String, value: GlobalValue },
    /// Insert facts in the given order.
    InsertElements(Vec<Fact>),
    /// Fire until fixpoint. `max` overrides the session's firing limit.
    FireAllRules {
        max: Option<usize>,
        out_identifier: Option<String>,
    },
    /// Copy every fact accepted by `filter` into the results.
    GetObjects { filter: FactFilter, out_identifier: String },
}

impl Command {
    pub fn set_global(identifier: impl Into<String>, value: impl Into<GlobalValue>) -> Self {
        Self::SetGlobal {
            identifier: identifier.into(),
            value: value.into(),
        }
    }

    pub fn insert_elements<I, F>(facts: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Fact>,
    {
        Self::InsertElements(facts.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub const fn fire_all_rules() -> Self {
        Self::FireAllRules {
            max: None,
            out_identifier: None,
        }
    }

    /// Fire with an explicit limit and record the firing count.
    pub fn fire_all_rules_limited(max: usize, out_identifier: impl Into<String>) -> Self {
        Self::FireAllRules {
            max: Some(max),
            out_identifier: Some(out_identifier.into()),
        }
    }

    pub fn get_objects(filter: FactFilter, out_identifier: impl Into<String>) -> Self {
        Self::GetObjects {
            filter,
            out_identifier: out_identifier.into(),
        }
    }
}

/// An ordered list of commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchExecution {
    commands: Vec<Command>,
}

impl BatchExecution {
    #[must_use]
    pub const fn new() -> Self {
        Self { commands: Vec::new() }
    }

    /// Append a command.
    #[must_use]
    pub fn with(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl FromIterator<Command> for BatchExecution {
    fn from_iter<T: IntoIterator<Item = Command>>(iter: T) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

/// A value stored in [`ExecutionResults`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResultValue {
    Facts(Vec<Fact>),
    FiredCount(usize),
}

/// Named outputs of one batch execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResults {
    values: BTreeMap<String, ResultValue>,
}

impl ExecutionResults {
    pub(crate) fn insert(&mut self, identifier: impl Into<String>, value: ResultValue) {
        self.values.insert(identifier.into(), value);
    }

    /// Every identifier with a stored value, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&ResultValue> {
        self.values.get(identifier)
    }

    /// Facts stored under `identifier`.
    #[must_use]
    pub fn facts(&self, identifier: &str) -> Option<&[Fact]> {
        match self.get(identifier)? {
            ResultValue::Facts(facts) => Some(facts),
            ResultValue::FiredCount(_) => None,
        }
    }

    /// Advice among the facts stored under `identifier`, in stored order.
    #[must_use]
    pub fn advice(&self, identifier: &str) -> Vec<Advice> {
        self.facts(identifier)
            .unwrap_or_default()
            .iter()
            .filter_map(Fact::as_advice)
            .cloned()
            .collect()
    }

    /// Firing count stored under `identifier`.
    #[must_use]
    pub fn fired(&self, identifier: &str) -> Option<usize> {
        match self.get(identifier)? {
            ResultValue::FiredCount(n) => Some(*n),
            ResultValue::Facts(_) => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_keeps_command_order() {
        let batch = BatchExecution::new()
            .with(Command::set_global("arg0", "ns"))
            .with(Command::insert_elements(vec![Advice::new("A", "a")]))
            .with(Command::fire_all_rules())
            .with(Command::get_objects(FactFilter::Advice, "advices"));

        assert_eq!(batch.len(), 4);
        assert!(matches!(batch.commands().first(), Some(Command::SetGlobal { identifier, .. }) if identifier == "arg0"));
        assert!(matches!(batch.commands().last(), Some(Command::GetObjects { .. })));
    }

    #[test]
    fn results_are_typed_by_identifier() {
        let mut results = ExecutionResults::default();
        results.insert("advices", ResultValue::Facts(vec![Advice::new("A", "a").into()]));
        results.insert("fired", ResultValue::FiredCount(3));

        assert_eq!(results.identifiers(), vec!["advices", "fired"]);
        assert_eq!(results.advice("advices").len(), 1);
        assert_eq!(results.fired("fired"), Some(3));
        assert_eq!(results.fired("advices"), None);
        assert!(results.facts("missing").is_none());
        assert!(results.advice("missing").is_empty());
    }
}
