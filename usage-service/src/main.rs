// SPDX-License-Identifier: GPL-3.0-only

//! Quick usage service - keeps disk usage estimates of a directory-backed
//! host fresh in the background.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use usage_service::{DirectoryHost, ServiceConfig, UsageOrchestrator, logging};
use usage_types::{UsageRecord, format_count};

const DEFAULT_CONFIG: &str = "/etc/quick-usage/config.toml";

#[derive(Debug, Parser)]
#[command(name = "quick-usage-service")]
#[command(about = "Estimate disk usage of a host's directories and jobs")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep estimates fresh until interrupted (default)
    Serve,
    /// Run once, print the results and exit
    Once {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Once { json } => once(config, json).await,
    }
}

async fn serve(config: ServiceConfig) -> Result<()> {
    tracing::info!(
        "Starting quick usage service v{} for {}",
        env!("CARGO_PKG_VERSION"),
        config.home_dir.display()
    );

    let host = Arc::new(DirectoryHost::from_config(&config));
    let quiet_period = config.quiet_period().max(Duration::from_secs(1));
    let orchestrator = UsageOrchestrator::start(host.clone(), config);

    orchestrator.trigger_refresh_on_startup();
    host.set_initialized(true);

    let mut ticker = tokio::time::interval(quiet_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let next_run = orchestrator.completed_runs() + 1;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                tracing::info!("Shutting down");
                break;
            }
            _ = orchestrator.wait_for_runs(next_run) => log_results(&orchestrator),
            _ = ticker.tick() => {
                let state = orchestrator.run_state();
                if state.is_running() {
                    tracing::info!(
                        "disk usage computation {:.0}% complete ({}/{})",
                        state.percent_complete(),
                        state.progress,
                        state.total
                    );
                }
                // Reading results refreshes them once the quiet period is over.
                let _ = orchestrator.directory_usages();
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

async fn once(config: ServiceConfig, json: bool) -> Result<()> {
    let host = Arc::new(DirectoryHost::from_config(&config));
    host.set_initialized(true);
    let orchestrator = UsageOrchestrator::start(host, config);

    if !orchestrator.trigger_refresh() {
        anyhow::bail!("disk usage computation could not be started");
    }
    orchestrator.wait_for_runs(1).await;
    orchestrator.shutdown().await;

    let state = orchestrator.run_state();
    let mut directories = orchestrator.directory_usages().to_vec();
    let mut jobs = orchestrator.job_usages().to_vec();
    directories.sort_by(|a, b| a.display_order(b));
    jobs.sort_by(|a, b| a.record.display_order(&b.record));

    if json {
        let document = serde_json::json!({
            "run": state,
            "directories": directories,
            "jobs": jobs,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    print_table("Directories", directories.iter());
    print_table("Jobs", jobs.iter().map(|job| &job.record));
    println!(
        "Reported {}/{} directories ({:.0}%) in {} ms",
        state.progress,
        state.total,
        state.percent_complete(),
        state.last_run_duration().num_milliseconds()
    );
    Ok(())
}

fn print_table<'a>(title: &str, records: impl Iterator<Item = &'a UsageRecord>) {
    println!("{title}:");
    println!("{:<32} {:>12} {:>10}  PATH", "NAME", "SIZE (MB)", "FILES");
    for record in records {
        println!(
            "{:<32} {:>12} {:>10}  {}",
            record.display_name,
            record.usage_in_mb(),
            format_count(record.count),
            record.path.display()
        );
    }
    println!();
}

fn log_results(orchestrator: &UsageOrchestrator) {
    let state = orchestrator.run_state();
    if state.last_run_duration().is_zero() {
        tracing::warn!("last disk usage computation did not complete");
        return;
    }
    for record in orchestrator.directory_usages().iter() {
        tracing::info!(
            path = %record.path.display(),
            files = record.count,
            "{}: {} MB",
            record.display_name,
            record.usage_in_mb()
        );
    }
    tracing::info!(
        jobs = orchestrator.job_usages().len(),
        "disk usage refreshed in {} ms",
        state.last_run_duration().num_milliseconds()
    );
}
