//! Automation daemon: plans the configured instance starts and stops and
//! fires them until interrupted.

use anyhow::Context;
use autopilot::automation::DryRunControllers;
use autopilot::config::AutomationMode;
use autopilot::{
    AutomationService, AutopilotConfig, BackgroundExecutor, Scheduler, ServiceManager,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Scheduled start/stop automation for cloud instances.
#[derive(Parser)]
#[command(name = "autopilotd", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Plan the configured automations and run until Ctrl-C.
    Run,

    /// Validate the configuration and list its automations.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("autopilot=info,autopilotd=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => check(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AutopilotConfig> {
    if let Some(path) = path {
        return AutopilotConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()));
    }
    let default_path = AutopilotConfig::default_config_path();
    if default_path.exists() {
        AutopilotConfig::from_file(&default_path)
            .with_context(|| format!("loading {}", default_path.display()))
    } else {
        info!(path = %default_path.display(), "no config file, using defaults");
        Ok(AutopilotConfig::default())
    }
}

async fn run(config: AutopilotConfig) -> anyhow::Result<()> {
    info!("autopilotd v{} starting", env!("CARGO_PKG_VERSION"));
    info!("no cloud provider controller is built in, instance commands are logged only");

    let scheduler = Scheduler::new(&config.scheduler);
    let executor = BackgroundExecutor::new(&config.background);
    let automation = AutomationService::new(scheduler.clone(), Arc::new(DryRunControllers));

    let mut services = ServiceManager::new();
    services.add(Arc::new(scheduler.clone()));
    services.add(Arc::new(executor));
    services.add(Arc::new(automation.clone()));
    services.start().await?;

    for entry in &config.automations {
        if let Err(e) = automation.apply(entry) {
            warn!(instance = %entry.instance_id, error = %e, "automation not installed");
        }
    }
    info!(planned = scheduler.len(), "automations installed");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("interrupted, shutting down");

    services.stop().await?;
    info!("autopilotd shut down cleanly");
    Ok(())
}

fn check(config: &AutopilotConfig) -> anyhow::Result<()> {
    config.validate()?;
    println!(
        "poll every {}s, collision policy {:?}, {} automation(s)",
        config.scheduler.poll_interval_secs,
        config.scheduler.collision_policy,
        config.automations.len()
    );
    for entry in &config.automations {
        let resource = entry.resource()?;
        let window = match (entry.mode, entry.start_at, entry.stop_at) {
            (AutomationMode::RunBetween, Some(start), Some(stop)) => {
                format!("run between {start} and {stop}")
            }
            (AutomationMode::StartTill, _, Some(stop)) => format!("start now, stop at {stop}"),
            (AutomationMode::StopOn, _, Some(stop)) => format!("stop at {stop}"),
            _ => "incomplete".to_owned(),
        };
        println!("  {resource}: {window}");
    }
    Ok(())
}
