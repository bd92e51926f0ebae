use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

mod cli;
mod error;
mod health;
mod preview;
mod registry;
mod relay;
mod runtime;
mod silence;
mod watchdog;

use cli::{Cli, Command};
use runtime::AgentRuntime;
use vigil_core::config::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_agent=info,vigil_drivers=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if matches!(cli.command, Some(Command::Setup)) {
        return setup(cli.config.as_deref());
    }

    let mut config = AgentConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), starting from defaults");
        AgentConfig::default()
    });
    cli.apply(&mut config);

    if config.token.is_none() || config.relay.is_none() {
        error!("a venue token and a relay URL are required (flags, config file, or VIGIL_* env)");
        std::process::exit(1);
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);
    let watchdog_enabled = config.watchdog;

    let rt = Arc::new(AgentRuntime::new(config, outbound_tx, event_tx));
    Arc::clone(&rt).start(event_rx);
    // Silence monitoring rides on the switcher's master meter.
    rt.audio_state.lock().unwrap().monitoring = rt.switcher.is_some();

    let registry = registry::Registry::new();
    info!(
        commands = registry.len(),
        venue = rt.config.name.as_deref().unwrap_or("unnamed"),
        "agent starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(runtime::status_loop(Arc::clone(&rt), shutdown_rx.clone()));
    tokio::spawn(preview::run(Arc::clone(&rt), shutdown_rx.clone()));
    if watchdog_enabled {
        tokio::spawn(watchdog::run(Arc::clone(&rt), shutdown_rx.clone()));
        tokio::spawn(silence::run(Arc::clone(&rt), shutdown_rx.clone()));
        tokio::spawn(health::run(Arc::clone(&rt), shutdown_rx.clone()));
    }

    let relay_task = tokio::spawn(relay::run(
        Arc::clone(&rt),
        registry,
        outbound_rx,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    // Give the relay leg a moment to close cleanly.
    let _ = tokio::time::timeout(Duration::from_secs(5), relay_task).await;
    Ok(())
}

/// Minimal starter: write a skeleton config and tell the operator where the
/// interactive wizard lives. The wizard itself is a separate tool.
fn setup(config_path: Option<&str>) -> anyhow::Result<()> {
    let dir = vigil_core::config::config_dir();
    let path = config_path
        .map(String::from)
        .unwrap_or_else(|| format!("{dir}/config.json"));
    if std::path::Path::new(&path).exists() {
        println!("Config already exists at {path}");
        return Ok(());
    }
    std::fs::create_dir_all(&dir)?;
    let skeleton = serde_json::to_string_pretty(&AgentConfig::default())?;
    std::fs::write(&path, skeleton)?;
    println!("Wrote starter config to {path}");
    println!("Fill in token and relay, then run vigil-agent.");
    Ok(())
}
