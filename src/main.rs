mod cli;
mod config;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tunneld_core::{
    credentials,
    engine::{Engine, EngineSettings, SshConnector},
    registry, relay,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "tunneld starting");

    let args = cli::Args::parse();
    let conf = config::load(args.config.as_deref())?;

    let resolved = credentials::resolve(&conf.ssh_config)?;
    let descriptors = registry::build(&conf.tunnel, &resolved)?;

    let settings = EngineSettings {
        relay_buffer: relay::buffer_size_from_env(),
        ..EngineSettings::default()
    };
    let mut engine = Engine::new(SshConnector::new(), settings);
    engine.startup(descriptors)?;

    match wait_for_signal().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => error!(error = %err, "signal handling failed; shutting down"),
    }
    engine.shutdown().await;

    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
        _ = quit.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    Ok(())
}
