//! Forward-chaining firing loop.
//!
//! Every rule keeps its own slice of the agenda. A join condition caches the
//! tuples it last returned and is only re-run once a slot it watches (or a
//! global) has changed since. A single-fact condition judges each fact once
//! per version by following working memory's change log, and re-judges
//! everything only when a global changes. Firing stops when no rule has an
//! activation left.
//!
//! Agenda order is salience (descending), then rule declaration order, then
//! the order the condition returned its tuples (handle order for single-fact
//! conditions). An activation is identified by its rule and the
//! `(handle, version)` of every matched fact, so a rule fires at most once
//! per tuple unless one of the facts is updated.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, trace};

use crate::base::RuleBase;
use crate::error::{Error, Result};
use crate::fact::FactHandle;
use crate::memory::WorkingMemory;
use crate::rule::{Condition, Rule, RuleContext, Tuple};

/// Default firing budget per fact present when firing starts.
pub const DEFAULT_FIRINGS_PER_FACT: usize = 64;

/// How many activations one `fire_all_rules` may fire before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringLimit {
    /// `n` firings per fact in working memory when firing starts (at least `n`).
    PerFact(usize),
    /// A fixed number of firings.
    Fixed(usize),
}

impl FiringLimit {
    /// The firing budget for a memory holding `facts` facts.
    #[must_use]
    pub fn budget(self, facts: usize) -> usize {
        match self {
            Self::PerFact(per_fact) => per_fact.saturating_mul(facts.max(1)),
            Self::Fixed(limit) => limit,
        }
    }
}

impl Default for FiringLimit {
    fn default() -> Self {
        Self::PerFact(DEFAULT_FIRINGS_PER_FACT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ActivationKey {
    rule: usize,
    facts: Vec<(FactHandle, u64)>,
}

struct Activation<'r> {
    rule: &'r Rule,
    tuple: Tuple,
    key: ActivationKey,
}

/// Cached matches of a join condition.
#[derive(Default)]
struct JoinMatches {
    tuples: Vec<Tuple>,
    cursor: usize,
    computed_at: Option<u64>,
}

/// Facts a single-fact condition accepted and has not fired yet.
#[derive(Default)]
struct EachMatches {
    pending: BTreeSet<(FactHandle, u64)>,
    log_cursor: usize,
    globals_seen: Option<u64>,
}

enum Matches {
    Join(JoinMatches),
    Each(EachMatches),
}

struct AgendaEntry<'r> {
    index: usize,
    rule: &'r Rule,
    matches: Matches,
}

impl<'r> AgendaEntry<'r> {
    fn new(index: usize, rule: &'r Rule) -> Self {
        let matches = match rule.condition() {
            Condition::Join { .. } => Matches::Join(JoinMatches::default()),
            Condition::Each { .. } => Matches::Each(EachMatches::default()),
        };
        Self { index, rule, matches }
    }

    /// Bring the cached matches up to date with `memory`.
    fn refresh(&mut self, memory: &WorkingMemory) {
        match (&mut self.matches, self.rule.condition()) {
            (Matches::Join(cache), Condition::Join { matcher, watches }) => {
                let changed = match watches {
                    None => memory.revision(),
                    Some(slots) => slots
                        .iter()
                        .map(|slot| memory.slot_changed_at(*slot))
                        .fold(memory.globals_changed_at(), u64::max),
                };
                if cache.computed_at.is_none_or(|at| changed > at) {
                    cache.tuples = matcher(memory);
                    cache.cursor = 0;
                    cache.computed_at = Some(memory.revision());
                }
            }
            (Matches::Each(cache), Condition::Each { filter, predicate }) => {
                let globals = memory.globals();
                let accept = |handle: FactHandle| {
                    let fact = memory.get(handle)?;
                    let version = memory.version(handle)?;
                    (filter.matches(fact) && predicate(fact, globals)).then_some((handle, version))
                };
                if cache.globals_seen != Some(memory.globals_changed_at()) {
                    cache.pending = memory.iter().filter_map(|(handle, _)| accept(handle)).collect();
                    cache.globals_seen = Some(memory.globals_changed_at());
                } else {
                    let fresh: Vec<_> = memory
                        .changed_since(cache.log_cursor)
                        .iter()
                        .filter_map(|handle| accept(*handle))
                        .collect();
                    cache.pending.extend(fresh);
                }
                cache.log_cursor = memory.log_len();
            }
            _ => {}
        }
    }

    /// The first cached match that is still live and has not fired.
    fn next_unfired(&mut self, memory: &WorkingMemory, fired: &HashSet<ActivationKey>) -> Option<Activation<'r>> {
        match &mut self.matches {
            Matches::Join(cache) => {
                while let Some(tuple) = cache.tuples.get(cache.cursor) {
                    let facts = tuple
                        .iter()
                        .map(|handle| memory.version(*handle).map(|v| (*handle, v)))
                        .collect::<Option<Vec<_>>>();
                    if let Some(facts) = facts {
                        let key = ActivationKey { rule: self.index, facts };
                        if !fired.contains(&key) {
                            return Some(Activation {
                                rule: self.rule,
                                tuple: tuple.clone(),
                                key,
                            });
                        }
                    }
                    cache.cursor = cache.cursor.saturating_add(1);
                }
                None
            }
            Matches::Each(cache) => {
                while let Some((handle, version)) = cache.pending.pop_first() {
                    if memory.version(handle) != Some(version) {
                        continue;
                    }
                    let key = ActivationKey {
                        rule: self.index,
                        facts: vec![(handle, version)],
                    };
                    if !fired.contains(&key) {
                        return Some(Activation {
                            rule: self.rule,
                            tuple: vec![handle],
                            key,
                        });
                    }
                }
                None
            }
        }
    }
}

struct Agenda<'r> {
    entries: Vec<AgendaEntry<'r>>,
    fired: HashSet<ActivationKey>,
}

impl<'r> Agenda<'r> {
    fn new(base: &'r RuleBase) -> Self {
        Self {
            entries: base
                .rules()
                .iter()
                .enumerate()
                .map(|(index, rule)| AgendaEntry::new(index, rule))
                .collect(),
            fired: HashSet::new(),
        }
    }

    fn next(&mut self, memory: &WorkingMemory) -> Option<Activation<'r>> {
        self.entries.iter_mut().find_map(|entry| {
            entry.refresh(memory);
            entry.next_unfired(memory, &self.fired)
        })
    }
}

/// Fire rules until no new activation exists. Returns the number fired.
///
/// # Errors
///
/// - [`Error::ActionFailed`] if an action returns an error; working memory
///   keeps the changes of earlier firings but not of the failing one.
/// - [`Error::FiringLimitExceeded`] if more activations would fire than
///   `limit` allows for the facts present at the start.
pub fn fire_all_rules(base: &RuleBase, memory: &mut WorkingMemory, limit: FiringLimit) -> Result<usize> {
    let budget = limit.budget(memory.len());
    let mut agenda = Agenda::new(base);
    let mut count = 0usize;

    while let Some(activation) = agenda.next(memory) {
        if count >= budget {
            return Err(Error::firing_limit_exceeded(budget));
        }

        let rule_name = activation.rule.name();
        trace!(rule = rule_name, facts = ?activation.tuple, "Firing rule");

        let changes = {
            let mut ctx = RuleContext::new(rule_name, memory, &activation.tuple);
            activation
                .rule
                .fire(&mut ctx)
                .map_err(|e| Error::action_failed(rule_name, e.to_string()))?;
            ctx.into_changes()
        };

        agenda.fired.insert(activation.key);
        memory.apply(changes, rule_name)?;
        count = count.saturating_add(1);
    }

    debug!(rule_base = base.name(), fired = count, budget, facts = memory.len(), "Reached fixpoint");
    Ok(count)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use ruleops_core::ResourceKind;

    use super::*;
    use crate::advice::Advice;
    use crate::fact::{DerivedFact, Fact, FactFilter, FactSlot};

    fn counter_base(rules: Vec<Rule>) -> RuleBase {
        RuleBase::new("test", rules).unwrap()
    }

    #[test]
    fn rule_without_condition_fires_once() {
        let base = counter_base(vec![
            Rule::builder("hello").then(|ctx| {
                ctx.insert_advice(Advice::new("Hello", "fired"));
                Ok(())
            }),
        ]);
        let mut memory = WorkingMemory::new();
        let fired = fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        assert_eq!(fired, 1);
        assert_eq!(memory.objects(&FactFilter::Advice).len(), 1);
    }

    #[test]
    fn chained_rules_reach_fixpoint() {
        // "seed" inserts a derived fact, "grow" turns it into advice.
        let base = counter_base(vec![
            Rule::builder("grow")
                .when_each(|fact, _| fact.as_derived().is_some_and(|d| d.name == "seed"))
                .then(|ctx| {
                    ctx.insert_advice(Advice::new("Grown", "from seed"));
                    Ok(())
                }),
            Rule::builder("seed").then(|ctx| {
                ctx.insert(DerivedFact::new("seed"));
                Ok(())
            }),
        ]);
        let mut memory = WorkingMemory::new();
        let fired = fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        assert_eq!(fired, 2);
        let advice = memory.objects(&FactFilter::Advice);
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].as_advice().unwrap().rule.as_deref(), Some("grow"));
    }

    #[test]
    fn updating_a_fact_reactivates_matching_rules() {
        // "bump" raises level until 3; each update makes the fact new to the agenda.
        let base = counter_base(vec![
            Rule::builder("bump")
                .when_each(|fact, _| {
                    fact.as_derived()
                        .and_then(|d| d.attributes.get("level"))
                        .and_then(|l| l.parse::<u32>().ok())
                        .is_some_and(|level| level < 3)
                })
                .then(|ctx| {
                    let handle = ctx.matched()[0];
                    let level = ctx
                        .fact(0)
                        .and_then(Fact::as_derived)
                        .and_then(|d| d.attributes.get("level"))
                        .and_then(|l| l.parse::<u32>().ok())
                        .unwrap_or(0);
                    ctx.update(handle, DerivedFact::new("counter").with("level", (level + 1).to_string()));
                    Ok(())
                }),
        ]);
        let mut memory = WorkingMemory::new();
        let handle = memory.insert(DerivedFact::new("counter").with("level", "0"));

        let fired = fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        assert_eq!(fired, 3);
        let level = memory
            .get(handle)
            .and_then(Fact::as_derived)
            .and_then(|d| d.attributes.get("level").cloned());
        assert_eq!(level.as_deref(), Some("3"));
    }

    #[test]
    fn salience_orders_the_agenda() {
        let base = counter_base(vec![
            Rule::builder("late").salience(-1).then(|ctx| {
                ctx.insert_advice(Advice::new("Late", "second"));
                Ok(())
            }),
            Rule::builder("early").salience(5).then(|ctx| {
                ctx.insert_advice(Advice::new("Early", "first"));
                Ok(())
            }),
        ]);
        let mut memory = WorkingMemory::new();
        fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        let categories: Vec<_> = memory.advice().map(|(_, a)| a.category.clone()).collect();
        assert_eq!(categories, vec!["Early", "Late"]);
    }

    #[test]
    fn retraction_removes_pending_activations() {
        // "sweep" (high salience) retracts every noise fact before "report" sees them.
        let base = counter_base(vec![
            Rule::builder("sweep")
                .salience(10)
                .when_each(|fact, _| fact.as_derived().is_some_and(|d| d.name == "noise"))
                .then(|ctx| {
                    let handle = ctx.matched()[0];
                    ctx.retract(handle);
                    Ok(())
                }),
            Rule::builder("report")
                .when_each(|fact, _| fact.as_derived().is_some_and(|d| d.name == "noise"))
                .then(|ctx| {
                    ctx.insert_advice(Advice::new("Noise", "should never fire"));
                    Ok(())
                }),
        ]);
        let mut memory = WorkingMemory::new();
        memory.insert(DerivedFact::new("noise"));
        memory.insert(DerivedFact::new("noise"));

        let fired = fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        assert_eq!(fired, 2);
        assert!(memory.is_empty());
    }

    #[test]
    fn failing_action_aborts_and_discards_its_changes() {
        let base = counter_base(vec![
            Rule::builder("explode").then(|ctx| {
                ctx.insert_advice(Advice::new("Partial", "must not survive"));
                Err(Error::invalid_fact("kaboom"))
            }),
        ]);
        let mut memory = WorkingMemory::new();
        let result = fire_all_rules(&base, &mut memory, FiringLimit::default());
        assert!(matches!(result, Err(Error::ActionFailed { ref rule, .. }) if rule == "explode"));
        assert!(memory.is_empty());
    }

    #[test]
    fn runaway_rules_hit_the_firing_limit() {
        // Every firing inserts a fresh fact that matches again.
        let base = counter_base(vec![
            Rule::builder("forever")
                .when_each(|fact, _| fact.as_derived().is_some())
                .then(|ctx| {
                    ctx.insert(DerivedFact::new("again"));
                    Ok(())
                }),
        ]);
        let mut memory = WorkingMemory::new();
        memory.insert(DerivedFact::new("start"));
        let result = fire_all_rules(&base, &mut memory, FiringLimit::Fixed(50));
        assert_eq!(result, Err(Error::firing_limit_exceeded(50)));
    }

    #[test]
    fn default_budget_scales_with_the_facts_present() {
        // Two firings per fact, well past any fixed cap.
        let base = counter_base(vec![
            Rule::builder("flag")
                .salience(1)
                .when_fact(FactFilter::Derived("item".into()), |_, _| true)
                .then(|ctx| {
                    ctx.insert_advice(Advice::new("Flagged", "item"));
                    Ok(())
                }),
            Rule::builder("drop")
                .when_fact(FactFilter::Advice, |_, _| true)
                .then(|ctx| {
                    let handle = ctx.matched()[0];
                    ctx.retract(handle);
                    Ok(())
                }),
        ]);
        let mut memory = WorkingMemory::new();
        for _ in 0..12_000 {
            memory.insert(DerivedFact::new("item"));
        }

        let fired = fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        assert_eq!(fired, 24_000);
        assert_eq!(memory.len(), 12_000);
        assert_eq!(memory.advice().count(), 0);
    }

    #[test]
    fn budget_is_per_fact_or_fixed() {
        assert_eq!(FiringLimit::PerFact(4).budget(0), 4);
        assert_eq!(FiringLimit::PerFact(4).budget(10), 40);
        assert_eq!(FiringLimit::Fixed(7).budget(10), 7);
        assert_eq!(FiringLimit::default().budget(2), 2 * DEFAULT_FIRINGS_PER_FACT);
    }

    #[test]
    fn watched_join_sees_changes_to_its_slots() {
        // "pair" joins markers with targets; targets arrive only after "spawn" fires.
        let base = counter_base(vec![
            Rule::builder("pair")
                .salience(1)
                .when(|memory| {
                    memory
                        .in_slot(FactSlot::Derived)
                        .filter(|(_, f)| f.as_derived().is_some_and(|d| d.name == "target"))
                        .map(|(h, _)| vec![h])
                        .collect()
                })
                .watching([FactSlot::Derived])
                .then(|ctx| {
                    ctx.insert_advice(Advice::new("Paired", "target"));
                    Ok(())
                }),
            Rule::builder("spawn").then(|ctx| {
                ctx.insert(DerivedFact::new("target"));
                ctx.insert(DerivedFact::new("target"));
                Ok(())
            }),
        ]);
        let mut memory = WorkingMemory::new();
        let fired = fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        assert_eq!(fired, 3);
        assert_eq!(memory.advice().count(), 2);
    }

    #[test]
    fn watched_join_ignores_other_slots() {
        // "count" watches only resources, so advice it inserts never re-runs it.
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let base = counter_base(vec![
            Rule::builder("count")
                .when(move |_| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    vec![Vec::new()]
                })
                .watching([ResourceKind::Pod])
                .then(|ctx| {
                    ctx.insert_advice(Advice::new("Counted", "once"));
                    Ok(())
                }),
        ]);
        let mut memory = WorkingMemory::new();
        fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_fact_rules_rejudge_updated_facts() {
        let base = counter_base(vec![
            Rule::builder("hot")
                .when_fact(FactFilter::Derived("sensor".into()), |fact, _| {
                    fact.as_derived().is_some_and(|d| d.attributes.get("state").is_some_and(|s| s == "hot"))
                })
                .then(|ctx| {
                    ctx.insert_advice(Advice::new("Hot", "sensor"));
                    Ok(())
                }),
            Rule::builder("heat")
                .salience(-1)
                .when_fact(FactFilter::Derived("sensor".into()), |fact, _| {
                    fact.as_derived().is_some_and(|d| d.attributes.get("state").is_some_and(|s| s == "cold"))
                })
                .then(|ctx| {
                    let handle = ctx.matched()[0];
                    ctx.update(handle, DerivedFact::new("sensor").with("state", "hot"));
                    Ok(())
                }),
        ]);
        let mut memory = WorkingMemory::new();
        memory.insert(DerivedFact::new("sensor").with("state", "cold"));
        let fired = fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap();
        assert_eq!(fired, 2);
        assert_eq!(memory.advice().count(), 1);
    }

    #[test]
    fn single_fact_rules_read_globals() {
        let base = counter_base(vec![
            Rule::builder("focus")
                .when_fact(FactFilter::Derived("item".into()), |_, globals| globals.text("mode") == Some("on"))
                .then(|ctx| {
                    ctx.insert_advice(Advice::new("On", "item"));
                    Ok(())
                }),
        ]);
        let mut memory = WorkingMemory::new();
        memory.insert(DerivedFact::new("item"));
        assert_eq!(fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap(), 0);

        memory.set_global("mode", "on");
        assert_eq!(fire_all_rules(&base, &mut memory, FiringLimit::default()).unwrap(), 1);
    }
}
