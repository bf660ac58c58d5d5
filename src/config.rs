//! Process configuration.
//!
//! Loaded from a TOML or JSON file (or defaults), then overridden by
//! `RULEOPS_*` environment variables, then by command-line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ruleops_advisor::{AdvisorConfig, CollectorConfig, LoopConfig, SourceFailurePolicy};
use ruleops_core::{ResourceKind, ResourceScope};
use ruleops_rules::{FiringLimit, SessionConfig, DEFAULT_FIRINGS_PER_FACT, DEFAULT_RULE_BASE};
use serde::{Deserialize, Serialize};

/// Configuration for a ruleops process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleopsConfig {
    /// Rule base loaded at start-up.
    #[serde(default = "default_rule_base")]
    pub rule_base: String,

    /// Deadline for collecting one snapshot.
    #[serde(with = "duration_secs", default = "default_collection_timeout")]
    pub collection_timeout: Duration,

    /// Namespace for kinds listed per namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub failure_policy: SourceFailurePolicy,

    /// Kinds to collect, by canonical or short name.
    #[serde(default = "default_kinds")]
    pub kinds: Vec<ResourceKind>,

    /// Per-kind scope overrides.
    #[serde(default)]
    pub scopes: BTreeMap<ResourceKind, ResourceScope>,

    /// Directory of resource record files.
    #[serde(default)]
    pub fixtures: Option<PathBuf>,

    /// Interval between runs in watch mode.
    #[serde(with = "duration_secs", default = "default_interval")]
    pub interval: Duration,

    /// Consecutive failed runs before watch mode gives up.
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    #[serde(default)]
    pub stop_on_error: bool,

    /// Firing budget per fact in a run.
    #[serde(default = "default_firings_per_fact")]
    pub firings_per_fact: usize,

    /// Fixed firing budget per run; replaces the per-fact budget when set.
    #[serde(default)]
    pub max_firings: Option<usize>,

    #[serde(default)]
    pub final_pass_on_stop: bool,

    #[serde(default = "default_true")]
    pub diagnostics_on_start: bool,
}

impl Default for RuleopsConfig {
    fn default() -> Self {
        Self {
            rule_base: default_rule_base(),
            collection_timeout: default_collection_timeout(),
            namespace: default_namespace(),
            failure_policy: SourceFailurePolicy::default(),
            kinds: default_kinds(),
            scopes: BTreeMap::new(),
            fixtures: None,
            interval: default_interval(),
            max_errors: default_max_errors(),
            stop_on_error: false,
            firings_per_fact: default_firings_per_fact(),
            max_firings: None,
            final_pass_on_stop: false,
            diagnostics_on_start: true,
        }
    }
}

impl RuleopsConfig {
    /// Load from `path` if given, otherwise start from defaults, then apply
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// environment variable holds an unusable value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    /// Load configuration from a file. `.json` files are read as JSON,
    /// anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))
        } else {
            toml::from_str(&content).with_context(|| format!("Failed to parse TOML config {}", path.display()))
        }
    }

    /// Apply `RULEOPS_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric, kind or policy variable cannot be parsed.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("RULEOPS_RULE_BASE") {
            self.rule_base = name;
        }
        if let Some(secs) = lookup("RULEOPS_COLLECTION_TIMEOUT") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("RULEOPS_COLLECTION_TIMEOUT must be whole seconds, got '{secs}'"))?;
            self.collection_timeout = Duration::from_secs(secs);
        }
        if let Some(namespace) = lookup("RULEOPS_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(kinds) = lookup("RULEOPS_KINDS") {
            self.kinds = kinds
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::parse::<ResourceKind>)
                .collect::<std::result::Result<_, _>>()
                .context("RULEOPS_KINDS must be a comma-separated list of resource kinds")?;
        }
        if let Some(dir) = lookup("RULEOPS_FIXTURES") {
            self.fixtures = Some(PathBuf::from(dir));
        }
        if let Some(policy) = lookup("RULEOPS_FAILURE_POLICY") {
            self.failure_policy = match policy.trim().to_ascii_lowercase().as_str() {
                "abort" => SourceFailurePolicy::Abort,
                "omit" => SourceFailurePolicy::Omit,
                other => bail!("RULEOPS_FAILURE_POLICY must be 'abort' or 'omit', got '{other}'"),
            };
        }
        Ok(self)
    }

    /// Check the values are usable together.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first unusable value.
    pub fn validate(&self) -> Result<()> {
        if self.rule_base.trim().is_empty() {
            bail!("rule_base must not be empty");
        }
        if self.interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        if self.firings_per_fact == 0 || self.max_firings == Some(0) {
            bail!("firing budget must be greater than zero");
        }
        self.collector_config()
            .validate()
            .context("Invalid collector configuration")
    }

    #[must_use]
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            timeout: self.collection_timeout,
            namespace: self.namespace.clone(),
            kinds: self.kinds.clone(),
            scopes: self.scopes.clone(),
            failure_policy: self.failure_policy,
        }
    }

    #[must_use]
    pub fn advisor_config(&self) -> AdvisorConfig {
        AdvisorConfig {
            rule_base: self.rule_base.clone(),
            collector: self.collector_config(),
            session: SessionConfig {
                firing_limit: self.firing_limit(),
            },
            final_pass_on_stop: self.final_pass_on_stop,
            diagnostics_on_start: self.diagnostics_on_start,
        }
    }

    #[must_use]
    pub fn firing_limit(&self) -> FiringLimit {
        self.max_firings
            .map_or(FiringLimit::PerFact(self.firings_per_fact), FiringLimit::Fixed)
    }

    #[must_use]
    pub fn loop_config(&self, arg: Option<String>) -> LoopConfig {
        LoopConfig {
            interval: self.interval,
            max_errors: self.max_errors,
            stop_on_error: self.stop_on_error,
            arg,
        }
    }
}

fn default_rule_base() -> String {
    DEFAULT_RULE_BASE.to_string()
}

const fn default_collection_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_kinds() -> Vec<ResourceKind> {
    ResourceKind::ALL.to_vec()
}

const fn default_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_max_errors() -> usize {
    10
}

const fn default_firings_per_fact() -> usize {
    DEFAULT_FIRINGS_PER_FACT
}

const fn default_true() -> bool {
    true
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
