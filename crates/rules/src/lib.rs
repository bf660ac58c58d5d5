//! Forward-chaining rule evaluation over cluster snapshots.
//!
//! A [`RuleBase`] is compiled once and shared. Each evaluation runs a
//! [`BatchExecution`] in a [`StatelessSession`], which owns a fresh
//! [`WorkingMemory`] for exactly that run:
//!
//! ```text
//! SetGlobal(arg0) -> SetGlobal(now) -> InsertElements -> FireAllRules -> GetObjects(Advice)
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod advice;
pub mod base;
pub mod builtin;
pub mod command;
pub mod engine;
pub mod error;
pub mod fact;
pub mod listener;
pub mod memory;
pub mod rule;
pub mod session;

pub use advice::{Advice, Severity};
pub use base::{RuleBase, RuleBaseLoader, RuleBaseRegistry};
pub use builtin::{DEFAULT_RULE_BASE, EMPTY_RULE_BASE};
pub use command::{BatchExecution, Command, ExecutionResults, ResultValue};
pub use engine::{fire_all_rules, FiringLimit, DEFAULT_FIRINGS_PER_FACT};
pub use error::{Error, Result};
pub use fact::{DerivedFact, Fact, FactFilter, FactHandle, FactSlot, GlobalValue, Globals};
pub use listener::{
    ListenerError, ListenerResult, ObjectDeleted, ObjectInserted, ObjectUpdated, TracingListener,
    WorkingMemoryListener,
};
pub use memory::WorkingMemory;
pub use rule::{Rule, RuleBuilder, RuleContext, Tuple};
pub use session::{evaluate, SessionConfig, StatelessSession, ADVICES, ARG0, NOW};
