//! Scheduled advisory loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ruleops_rules::Advice;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::advisor::AdviceRunner;
use crate::error::{Error, Result};

/// Configuration for the advisory loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Interval between runs. The first run starts immediately.
    pub interval: Duration,
    /// Maximum consecutive errors before stopping.
    pub max_errors: usize,
    /// Whether to stop on first error.
    pub stop_on_error: bool,
    /// Argument passed to every run.
    pub arg: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_errors: 10,
            stop_on_error: false,
            arg: None,
        }
    }
}

/// Outcome of one scheduled run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub id: Ulid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub advice: Vec<Advice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs the advisor on a fixed interval until stopped.
pub struct AdvisoryLoop {
    runner: Arc<dyn AdviceRunner>,
    config: LoopConfig,
    reports: Option<mpsc::Sender<RunReport>>,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl AdvisoryLoop {
    /// Create a new advisory loop.
    pub fn new(runner: Arc<dyn AdviceRunner>, config: LoopConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            runner,
            config,
            reports: None,
            stop_rx,
            stop_tx,
        }
    }

    /// Publish a [`RunReport`] for every run on `tx`.
    #[must_use]
    pub fn with_reports(mut self, tx: mpsc::Sender<RunReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Run until stopped or too many consecutive runs fail.
    ///
    /// # Errors
    ///
    /// The run's error when `stop_on_error` is set, otherwise
    /// [`Error::LoopAborted`] once `max_errors` consecutive runs fail.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            interval_ms = self.config.interval.as_millis(),
            arg = self.config.arg.as_deref(),
            "Starting advisory loop"
        );

        let mut consecutive_errors = 0usize;
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(advice) => {
                            consecutive_errors = 0;
                            debug!(advice = advice, "Advisory run succeeded");
                        }
                        Err(e) => {
                            consecutive_errors = consecutive_errors.saturating_add(1);
                            error!(
                                error = %e,
                                consecutive = consecutive_errors,
                                "Advisory run failed"
                            );

                            if self.config.stop_on_error {
                                return Err(e);
                            }

                            if consecutive_errors >= self.config.max_errors {
                                error!("Max errors reached, stopping loop");
                                return Err(Error::loop_aborted(consecutive_errors));
                            }
                        }
                    }
                }
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        info!("Advisory loop stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run once, publish the report, and return the advice count.
    async fn run_once(&self) -> Result<usize> {
        let id = Ulid::new();
        let started_at = Utc::now();
        let outcome = self.runner.evaluate_advice(self.config.arg.clone()).await;
        let finished_at = Utc::now();

        let (advice, error, result) = match outcome {
            Ok(advice) => {
                let count = advice.len();
                (advice, None, Ok(count))
            }
            Err(e) => (Vec::new(), Some(e.to_string()), Err(e)),
        };

        if let Some(tx) = &self.reports {
            let report = RunReport {
                id,
                started_at,
                finished_at,
                advice,
                error,
            };
            if tx.send(report).await.is_err() {
                debug!(run = %id, "Report receiver dropped");
            }
        }
        result
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    #[must_use]
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop an advisory loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
