//! # ruleops
//!
//! Entry point for the advisory loop.
//!
//! ## Start-up
//!
//! 1. **Configuration** - file, then `RULEOPS_*` environment, then flags
//! 2. **Resource source** - the fixture directory standing in for the cluster API
//! 3. **Advisor** - loads the rule base once and builds the session
//!
//! A rule base that fails to load halts start-up.
//!
//! ## Shutdown
//!
//! Ctrl+C stops `watch` mode after the current run; `on_stop` then runs the
//! optional final pass.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ruleops::cli::{Cli, Commands};
use ruleops::config::RuleopsConfig;
use ruleops::output::{render_advice, render_report, OutputFormat};
use ruleops_advisor::{Advisor, AdvisoryLoop, FixtureResourceSource, ResourceSource};
use ruleops_rules::RuleBaseRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let mut config = RuleopsConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let registry = Arc::new(RuleBaseRegistry::with_builtins());

    match cli.command {
        Commands::RuleBases => {
            for name in registry.names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Run { arg0 } => {
            let advisor = start_advisor(&config, registry).await?;
            let advice = advisor.evaluate_advice(arg0).await.context("Advisory run failed")?;
            println!("{}", render_advice(&advice, cli.output)?);
            stop_advisor(&advisor, cli.output).await
        }
        Commands::Watch { arg0, .. } => {
            let advisor = start_advisor(&config, registry).await?;
            watch(Arc::clone(&advisor), &config, arg0, cli.output).await?;
            stop_advisor(&advisor, cli.output).await
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resource_source(config: &RuleopsConfig) -> Result<Arc<dyn ResourceSource>> {
    let dir = config
        .fixtures
        .as_ref()
        .ok_or_else(|| anyhow!("No resource source configured: pass --fixtures or set `fixtures` in the config file"))?;
    let source = FixtureResourceSource::new(dir).context("Failed to open fixture directory")?;
    info!(dir = %dir.display(), "Using fixture resource source");
    Ok(Arc::new(source))
}

async fn start_advisor(config: &RuleopsConfig, registry: Arc<RuleBaseRegistry>) -> Result<Arc<Advisor>> {
    let source = resource_source(config)?;
    let advisor = Arc::new(Advisor::new(config.advisor_config(), source, registry));
    advisor
        .on_start()
        .await
        .with_context(|| format!("Failed to start advisor with rule base '{}'", config.rule_base))?;
    Ok(advisor)
}

async fn stop_advisor(advisor: &Advisor, format: OutputFormat) -> Result<()> {
    if let Some(advice) = advisor.on_stop().await.context("Final advisory pass failed")? {
        println!("{}", render_advice(&advice, format)?);
    }
    Ok(())
}

/// Run the advisory loop until Ctrl+C or the loop gives up.
async fn watch(advisor: Arc<Advisor>, config: &RuleopsConfig, arg0: Option<String>, format: OutputFormat) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(16);
    let mut advisory = AdvisoryLoop::new(advisor, config.loop_config(arg0)).with_reports(tx);
    let stopper = advisory.stopper();

    let printer = tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            match render_report(&report, format) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => warn!(error = %e, "Failed to render run report"),
            }
        }
    });

    let mut handle = tokio::spawn(async move { advisory.run().await });

    let result = tokio::select! {
        joined = &mut handle => joined,
        () = wait_for_shutdown() => {
            stopper.stop();
            handle.await
        }
    };

    if let Err(e) = printer.await {
        error!(error = %e, "Report printer failed");
    }

    result
        .context("Advisory loop task failed")?
        .context("Advisory loop stopped with an error")
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping after the current run"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
