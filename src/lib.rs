//! # ruleops
//!
//! Command-line front end for the ruleops advisory loop: configuration,
//! argument parsing and output rendering. The engine itself lives in the
//! workspace crates re-exported here.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cli;
pub mod config;
pub mod output;

pub use ruleops_advisor;
pub use ruleops_core;
pub use ruleops_rules;
