//! CLI command definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::RuleopsConfig;
use crate::output::OutputFormat;

/// ruleops - level-triggered cluster advisor
#[derive(Parser, Debug)]
#[command(name = "ruleops")]
#[command(version)]
#[command(about = "Snapshot cluster resources, fire a rule base once, report advice")]
#[command(
    long_about = "ruleops collects a point-in-time snapshot of cluster resources, evaluates it against a compiled rule base, and prints the advice the rules produce. Nothing is carried over between runs."
)]
pub struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of resource record files (YAML or JSON)
    #[arg(short, long, global = true)]
    pub fixtures: Option<PathBuf>,

    /// Rule base to load
    #[arg(short, long, global = true)]
    pub rule_base: Option<String>,

    /// Collection timeout in seconds
    #[arg(short, long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Namespace for namespaced kinds
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Log filter, e.g. `debug` or `ruleops_rules=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect once, evaluate, print advice
    Run {
        /// Argument bound to the `arg0` global (the built-in rules treat it as a namespace focus)
        arg0: Option<String>,
    },

    /// Evaluate on an interval until interrupted
    Watch {
        /// Seconds between runs
        #[arg(short, long)]
        interval: Option<u64>,

        /// Argument bound to the `arg0` global on every run
        arg0: Option<String>,
    },

    /// List the available rule bases
    RuleBases,
}

impl Cli {
    /// Apply command-line overrides on top of file and environment settings.
    pub fn apply_overrides(&self, config: &mut RuleopsConfig) {
        if let Some(dir) = &self.fixtures {
            config.fixtures = Some(dir.clone());
        }
        if let Some(name) = &self.rule_base {
            config.rule_base.clone_from(name);
        }
        if let Some(secs) = self.timeout {
            config.collection_timeout = Duration::from_secs(secs);
        }
        if let Some(namespace) = &self.namespace {
            config.namespace.clone_from(namespace);
        }
        if let Commands::Watch {
            interval: Some(secs), ..
        } = self.command
        {
            config.interval = Duration::from_secs(secs);
        }
    }
}
