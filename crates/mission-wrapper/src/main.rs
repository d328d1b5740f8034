//! Mission wrapper - supervises one mission's agent process

use agent_mission_core::config::{ConfigOverrides, resolve_config};
use agent_mission_core::logging;
use agent_mission_core::mission::Mission;
use agent_mission_core::paths::RootPaths;
use agent_mission_wrapper::wrapper::{Signal, Wrapper};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Mission wrapper - keeps one agent alive across config, template and
/// credential changes
#[derive(Parser, Debug)]
#[command(name = "mission-wrapper")]
#[command(about = "Supervise one mission's agent process")]
#[command(version)]
struct Args {
    /// Mission to supervise
    #[arg(long, value_name = "ID")]
    mission_id: String,

    /// Initial prompt for a fresh session
    #[arg(long, value_name = "TEXT", conflicts_with = "resume")]
    prompt: Option<String>,

    /// Continue the mission's previous session
    #[arg(long)]
    resume: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Agent executable (overrides config)
    #[arg(long, value_name = "PATH")]
    agent_command: Option<String>,

    /// Do not synchronize credentials with other missions
    #[arg(long)]
    no_credential_sync: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    validate_mission_id(&args.mission_id)?;

    let root = RootPaths::resolve().context("Failed to determine mission root")?;
    let overrides = ConfigOverrides {
        config_path: args.config.clone(),
        agent_command: args.agent_command.clone(),
        no_credential_sync: args.no_credential_sync,
    };
    let config = resolve_config(&overrides, &root).context("Failed to resolve configuration")?;

    let paths = root.mission(&args.mission_id);
    let mission = Mission::load(&args.mission_id, &paths)?;
    info!(
        "Mission wrapper starting for {} (root {})",
        mission.short_id(),
        root.root().display()
    );

    let (signal_tx, signal_rx) = mpsc::channel(4);
    spawn_signal_forwarder(signal_tx)?;

    let code = Wrapper::new(mission, root, config)
        .with_prompt(args.prompt)
        .resume(args.resume)
        .run(signal_rx, CancellationToken::new())
        .await?;

    info!("Mission wrapper exiting with code {code}");
    std::process::exit(code);
}

fn validate_mission_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("Mission id must not be empty");
    }
    if id.contains(['/', '\\']) || id == "." || id == ".." {
        bail!("Mission id {id:?} must not contain path separators");
    }
    Ok(())
}

/// Relay SIGINT/SIGTERM received by the wrapper to the event loop.
#[cfg(unix)]
fn spawn_signal_forwarder(tx: mpsc::Sender<Signal>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    tokio::spawn(async move {
        loop {
            let forwarded = tokio::select! {
                Some(()) = sigint.recv() => Signal::Interrupt,
                Some(()) = sigterm.recv() => Signal::Terminate,
                else => break,
            };
            if tx.send(forwarded).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_forwarder(tx: mpsc::Sender<Signal>) -> Result<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(Signal::Interrupt).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}
