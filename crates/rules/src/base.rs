//! Rule bases and the registry they are loaded from.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::rule::Rule;

/// An immutable, named, compiled set of rules.
///
/// Rules are kept in agenda order: salience descending, declaration order
/// among equals.
#[derive(Debug)]
pub struct RuleBase {
    name: String,
    rules: Vec<Rule>,
}

impl RuleBase {
    /// Compile a rule base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuleBaseInvalid`] if two rules share a name.
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        if let Some(dup) = rules.iter().find(|r| !seen.insert(r.name().to_string())) {
            return Err(Error::rule_base_invalid(
                &name,
                format!("duplicate rule name '{}'", dup.name()),
            ));
        }

        let mut rules = rules;
        rules.sort_by_key(|r| std::cmp::Reverse(r.salience()));
        Ok(Self { name, rules })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rules in agenda order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::name).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Loads compiled rule bases by name.
pub trait RuleBaseLoader: Send + Sync {
    /// Load the named rule base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuleBaseNotFound`] or [`Error::RuleBaseInvalid`].
    fn load(&self, name: &str) -> Result<Arc<RuleBase>>;
}

type RuleBaseFactory = dyn Fn() -> Result<RuleBase> + Send + Sync;

/// Registry of named rule base factories.
///
/// A factory compiles its rule base on every `load`; callers load once at
/// startup and share the resulting `Arc`.
#[derive(Default)]
pub struct RuleBaseRegistry {
    factories: BTreeMap<String, Arc<RuleBaseFactory>>,
}

impl RuleBaseRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in rule bases.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_all(&mut registry);
        registry
    }

    /// Register a factory under a name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<RuleBase> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Check if a rule base is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl RuleBaseLoader for RuleBaseRegistry {
    fn load(&self, name: &str) -> Result<Arc<RuleBase>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::rule_base_not_found(name))?;

        debug!(rule_base = name, "Compiling rule base");
        let base = factory()?;
        if base.name() != name {
            return Err(Error::rule_base_invalid(
                name,
                format!("factory produced rule base '{}'", base.name()),
            ));
        }

        info!(rule_base = name, rules = base.len(), "Rule base loaded");
        Ok(Arc::new(base))
    }
}
