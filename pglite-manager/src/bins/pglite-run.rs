// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use pglite_manager::config::{DEFAULT_DRIVER, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT};
use pglite_manager::{Configuration, LogLevel, Supervisor, load_config};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "pglite-run")]
#[command(about = "Run a PGlite engine until interrupted and print how to connect to it", long_about = None)]
struct Args {
    /// YAML config file; other flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen on TCP instead of a Unix socket
    #[arg(long)]
    tcp: bool,

    /// TCP host (implies --tcp)
    #[arg(long)]
    host: Option<String>,

    /// TCP port (implies --tcp)
    #[arg(long)]
    port: Option<u16>,

    /// Extension to load, may be repeated
    #[arg(short, long = "extension")]
    extensions: Vec<String>,

    /// Workspace directory for the generated launcher and node_modules
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Startup timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// DEBUG, INFO, WARNING, ERROR or CRITICAL
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn configuration(self) -> Result<Configuration> {
        let mut builder = match &self.config {
            Some(path) => load_config(path)?,
            None => Configuration::builder(),
        };
        if self.tcp || self.host.is_some() || self.port.is_some() {
            builder = builder.tcp(
                self.host.unwrap_or_else(|| DEFAULT_TCP_HOST.to_string()),
                self.port.unwrap_or(DEFAULT_TCP_PORT),
            );
        }
        if let Some(dir) = self.work_dir {
            builder = builder.work_dir(dir);
        }
        if let Some(secs) = self.timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(level) = self.log_level {
            builder = builder.log_level(level.parse::<LogLevel>()?);
        }
        Ok(builder.extensions(self.extensions).build()?)
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C");
    Ok(())
}

#[allow(clippy::print_stdout)]
#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().configuration()?;
    simple_logger::SimpleLogger::new()
        .with_level(config.log_level().to_level_filter())
        .init()?;
    info!("pglite-run starting (version {})", env!("CARGO_PKG_VERSION"));

    let mut supervisor = Supervisor::new(config);
    supervisor
        .start()
        .await
        .context("failed to start PGlite engine")?;

    println!("connection string: {}", supervisor.connection_string(DEFAULT_DRIVER)?);
    println!("uri:               {}", supervisor.uri()?);
    println!("dsn:               {}", supervisor.dsn()?);

    let waited = shutdown_signal().await;
    info!("pglite-run shutting down");
    supervisor.stop().await;
    waited
}
