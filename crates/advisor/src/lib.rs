//! Level-triggered cluster advisory loop.
//!
//! Every run starts from nothing:
//!
//! 1. The [`SnapshotCollector`] lists each resource kind concurrently and
//!    merges the results into one [`Snapshot`](ruleops_core::Snapshot)
//! 2. The [`Advisor`] feeds the snapshot to a stateless rule session
//! 3. The advice the rules asserted is returned; the working memory is dropped
//!
//! Runs can be triggered by hand ([`Advisor::evaluate_advice`]), on a
//! schedule ([`AdvisoryLoop`]), or once more at shutdown ([`Advisor::on_stop`]).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ruleops_advisor::{Advisor, AdvisorConfig, InMemoryResourceSource};
//! use ruleops_rules::RuleBaseRegistry;
//!
//! #[tokio::main]
//! async fn main() -> ruleops_advisor::Result<()> {
//!     let advisor = Advisor::new(
//!         AdvisorConfig::default(),
//!         Arc::new(InMemoryResourceSource::default()),
//!         Arc::new(RuleBaseRegistry::with_builtins()),
//!     );
//!     advisor.on_start().await?;
//!     let advice = advisor.evaluate_advice(Some("default".into())).await?;
//!     println!("{} findings", advice.len());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod advisor;
pub mod collector;
pub mod error;
pub mod r#loop;
pub mod source;

pub use advisor::{AdviceRunner, Advisor, AdvisorConfig};
pub use collector::{CollectorConfig, SnapshotCollector, SourceFailurePolicy, DEFAULT_COLLECTION_TIMEOUT};
pub use error::{Error, Result};
pub use r#loop::{AdvisoryLoop, LoopConfig, LoopStopper, RunReport};
pub use source::{FixtureResourceSource, InMemoryResourceSource, ResourceSource};
