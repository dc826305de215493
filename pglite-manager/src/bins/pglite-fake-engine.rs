// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Stand-in for `node pglite_manager.js` in end-to-end tests. Reads the launch
//! description from its working directory, listens where it says, and shuts
//! down on SIGTERM/SIGINT. Behavior switches come in through NODE_OPTIONS:
//! `--fake-ignore-term` ignores SIGTERM, `--fake-fail-startup` exits 1 at once,
//! `--fake-no-listen` never binds.

use anyhow::{Context, Result};
use pglite_manager::Transport;
use pglite_manager::workspace::LaunchSpec;
use std::path::Path;
use tokio::signal::unix::{SignalKind, signal};

fn node_option(flag: &str) -> bool {
    std::env::var("NODE_OPTIONS")
        .map(|options| options.split_whitespace().any(|o| o == flag))
        .unwrap_or(false)
}

enum Listener {
    Tcp(tokio::net::TcpListener),
    Unix(tokio::net::UnixListener),
}

impl Listener {
    async fn bind(transport: &Transport) -> Result<Self> {
        match transport {
            Transport::Tcp { host, port } => {
                let listener = tokio::net::TcpListener::bind((host.as_str(), *port))
                    .await
                    .with_context(|| format!("failed to bind {host}:{port}"))?;
                Ok(Listener::Tcp(listener))
            }
            Transport::Unix { socket_path } => {
                let _ = std::fs::remove_file(socket_path);
                let listener = tokio::net::UnixListener::bind(socket_path)
                    .with_context(|| format!("failed to bind {}", socket_path.display()))?;
                Ok(Listener::Unix(listener))
            }
        }
    }

    /// Accept and immediately drop connections until the task is dropped.
    async fn serve(&self) {
        loop {
            let accepted = match self {
                Listener::Tcp(l) => l.accept().await.map(|_| ()),
                Listener::Unix(l) => l.accept().await.map(|_| ()),
            };
            if accepted.is_err() {
                return;
            }
        }
    }
}

#[allow(clippy::print_stdout, clippy::print_stderr)]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    if node_option("--fake-fail-startup") {
        eprintln!("Failed to start PGlite server: fake startup failure");
        std::process::exit(1);
    }
    let ignore_term = node_option("--fake-ignore-term");

    let spec = LaunchSpec::load(Path::new("."))?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let listener = if node_option("--fake-no-listen") {
        println!("Not listening");
        None
    } else {
        let listener = Listener::bind(&spec.transport).await?;
        println!(
            "Server started on {} with extensions {:?}",
            spec.transport,
            spec.extensions
                .iter()
                .map(|e| e.registry_key.as_str())
                .collect::<Vec<_>>()
        );
        Some(listener)
    };

    let received = tokio::select! {
        _ = async {
            match &listener {
                Some(listener) => listener.serve().await,
                None => std::future::pending().await,
            }
        } => "listener closed",
        _ = async {
            loop {
                sigterm.recv().await;
                if !ignore_term {
                    break;
                }
                println!("Ignoring SIGTERM");
            }
        } => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    println!("Received {received}, shutting down gracefully...");

    drop(listener);
    if let Some(socket_path) = spec.transport.socket_path() {
        let _ = std::fs::remove_file(socket_path);
    }
    println!("Server stopped");
    Ok(())
}
