//! Rules: a condition over working memory and an action to run per match.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ruleops_core::{ResourceKind, ResourceRecord};

use crate::advice::Advice;
use crate::error::Result;
use crate::fact::{Fact, FactFilter, FactHandle, FactSlot, GlobalValue, Globals};
use crate::memory::{Change, WorkingMemory};

/// The facts one activation matched, in pattern order.
pub type Tuple = Vec<FactHandle>;

type JoinFn = dyn Fn(&WorkingMemory) -> Vec<Tuple> + Send + Sync;
type FactFn = dyn Fn(&Fact, &Globals) -> bool + Send + Sync;
type ActionFn = dyn Fn(&mut RuleContext<'_>) -> Result<()> + Send + Sync;

/// How a rule matches working memory.
#[derive(Clone)]
pub(crate) enum Condition {
    /// Arbitrary tuples computed from the whole memory. `watches` names the
    /// slots the matcher reads; `None` means any change may affect it.
    Join {
        matcher: Arc<JoinFn>,
        watches: Option<BTreeSet<FactSlot>>,
    },
    /// One fact at a time, judged from that fact and the globals alone.
    Each {
        filter: FactFilter,
        predicate: Arc<FactFn>,
    },
}

impl Condition {
    fn all_matches(&self, memory: &WorkingMemory) -> Vec<Tuple> {
        match self {
            Self::Join { matcher, .. } => matcher(memory),
            Self::Each { filter, predicate } => memory
                .iter()
                .filter(|(_, fact)| filter.matches(fact) && predicate(fact, memory.globals()))
                .map(|(handle, _)| vec![handle])
                .collect(),
        }
    }
}

/// A compiled condition/action pair.
///
/// The condition returns every tuple of facts it matches. The action runs
/// once per tuple that has not fired before.
#[derive(Clone)]
pub struct Rule {
    name: String,
    salience: i32,
    condition: Condition,
    action: Arc<ActionFn>,
}

impl Rule {
    /// Start building a rule.
    pub fn builder(name: impl Into<String>) -> RuleBuilder {
        RuleBuilder {
            name: name.into(),
            salience: 0,
            condition: None,
            watches: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Agenda priority; higher fires first.
    #[must_use]
    pub const fn salience(&self) -> i32 {
        self.salience
    }

    /// Every tuple the condition currently matches.
    #[must_use]
    pub fn matches(&self, memory: &WorkingMemory) -> Vec<Tuple> {
        self.condition.all_matches(memory)
    }

    pub(crate) const fn condition(&self) -> &Condition {
        &self.condition
    }

    pub(crate) fn fire(&self, ctx: &mut RuleContext<'_>) -> Result<()> {
        (self.action)(ctx)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("salience", &self.salience)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Rule`].
pub struct RuleBuilder {
    name: String,
    salience: i32,
    condition: Option<Condition>,
    watches: Option<BTreeSet<FactSlot>>,
}

impl RuleBuilder {
    /// Set the salience.
    #[must_use]
    pub const fn salience(mut self, salience: i32) -> Self {
        self.salience = salience;
        self
    }

    /// Match arbitrary tuples.
    ///
    /// The matcher is re-run whenever working memory changes, unless
    /// [`RuleBuilder::watching`] narrows that to the slots it reads.
    #[must_use]
    pub fn when<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&WorkingMemory) -> Vec<Tuple> + Send + Sync + 'static,
    {
        self.condition = Some(Condition::Join {
            matcher: Arc::new(matcher),
            watches: None,
        });
        self
    }

    /// Match each single fact accepted by `predicate`, which may consult the
    /// rest of working memory.
    #[must_use]
    pub fn when_each<F>(self, predicate: F) -> Self
    where
        F: Fn(&Fact, &WorkingMemory) -> bool + Send + Sync + 'static,
    {
        self.when(move |memory| {
            memory
                .iter()
                .filter(|(_, fact)| predicate(fact, memory))
                .map(|(handle, _)| vec![handle])
                .collect()
        })
    }

    /// Match each resource of `kind` accepted by `predicate`, which may
    /// consult the rest of working memory.
    #[must_use]
    pub fn when_resource<F>(self, kind: ResourceKind, predicate: F) -> Self
    where
        F: Fn(&ResourceRecord, &WorkingMemory) -> bool + Send + Sync + 'static,
    {
        self.when(move |memory| {
            memory
                .resources(kind)
                .filter(|(_, record)| predicate(record, memory))
                .map(|(handle, _)| vec![handle])
                .collect()
        })
    }

    /// Match each fact accepted by `filter` and `predicate`.
    ///
    /// The predicate sees only the fact and the globals, so facts are judged
    /// once per version instead of on every pass.
    #[must_use]
    pub fn when_fact<F>(mut self, filter: FactFilter, predicate: F) -> Self
    where
        F: Fn(&Fact, &Globals) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Condition::Each {
            filter,
            predicate: Arc::new(predicate),
        });
        self
    }

    /// Match each resource of `kind` judged from itself and the globals.
    #[must_use]
    pub fn when_record<F>(self, kind: ResourceKind, predicate: F) -> Self
    where
        F: Fn(&ResourceRecord, &Globals) -> bool + Send + Sync + 'static,
    {
        self.when_fact(FactFilter::Resource(Some(kind)), move |fact, globals| {
            fact.as_resource().is_some_and(|record| predicate(record, globals))
        })
    }

    /// Declare the slots a `when*` matcher reads. Changes elsewhere no
    /// longer cause it to be re-run. Globals are always watched.
    #[must_use]
    pub fn watching<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FactSlot>,
    {
        self.watches = Some(slots.into_iter().map(Into::into).collect());
        self
    }

    /// Finish the rule with its action.
    ///
    /// A rule without a condition matches once with an empty tuple.
    pub fn then<F>(self, action: F) -> Rule
    where
        F: Fn(&mut RuleContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let condition = match self.condition {
            Some(Condition::Join { matcher, watches }) => Condition::Join {
                matcher,
                watches: self.watches.or(watches),
            },
            Some(each @ Condition::Each { .. }) => each,
            None => Condition::Join {
                matcher: Arc::new(|_: &WorkingMemory| vec![Vec::new()]),
                watches: Some(BTreeSet::new()),
            },
        };
        Rule {
            name: self.name,
            salience: self.salience,
            condition,
            action: Arc::new(action),
        }
    }
}

/// What an action sees and may change.
///
/// Changes are buffered and applied after the action returns `Ok`; a failing
/// action leaves working memory untouched.
pub struct RuleContext<'a> {
    rule: &'a str,
    memory: &'a WorkingMemory,
    matched: &'a [FactHandle],
    changes: Vec<Change>,
}

impl<'a> RuleContext<'a> {
    pub(crate) const fn new(rule: &'a str, memory: &'a WorkingMemory, matched: &'a [FactHandle]) -> Self {
        Self {
            rule,
            memory,
            matched,
            changes: Vec::new(),
        }
    }

    #[must_use]
    pub const fn rule_name(&self) -> &str {
        self.rule
    }

    #[must_use]
    pub const fn memory(&self) -> &WorkingMemory {
        self.memory
    }

    /// Handles of the matched tuple.
    #[must_use]
    pub const fn matched(&self) -> &[FactHandle] {
        self.matched
    }

    /// The `index`-th matched fact.
    #[must_use]
    pub fn fact(&self, index: usize) -> Option<&Fact> {
        self.matched
            .get(index)
            .and_then(|handle| self.memory.get(*handle))
    }

    /// The `index`-th matched fact, if it is a resource.
    #[must_use]
    pub fn resource(&self, index: usize) -> Option<&ResourceRecord> {
        self.fact(index).and_then(Fact::as_resource)
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<&GlobalValue> {
        self.memory.global(name)
    }

    pub fn insert(&mut self, fact: impl Into<Fact>) {
        self.changes.push(Change::Insert(fact.into()));
    }

    /// Insert advice, stamping it with this rule's name unless already set.
    pub fn insert_advice(&mut self, advice: Advice) {
        let advice = if advice.rule.is_some() {
            advice
        } else {
            advice.from_rule(self.rule)
        };
        self.insert(advice);
    }

    pub fn update(&mut self, handle: FactHandle, fact: impl Into<Fact>) {
        self.changes.push(Change::Update(handle, fact.into()));
    }

    pub fn retract(&mut self, handle: FactHandle) {
        self.changes.push(Change::Retract(handle));
    }

    pub(crate) fn into_changes(self) -> Vec<Change> {
        self.changes
    }
}
