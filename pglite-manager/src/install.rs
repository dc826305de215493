// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::{Configuration, DependencyPolicy};
use crate::error::{Error, Result};
use crate::workspace::{ENGINE_PACKAGE, Workspace};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;

/// Walk from `start` up through its ancestors and return the first
/// `node_modules` that contains the engine package.
pub fn find_node_modules(start: &Path) -> Option<PathBuf> {
    let start = std::fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .map(|dir| dir.join("node_modules"))
        .find(|node_modules| node_modules.join(ENGINE_PACKAGE).exists())
}

fn needs_install(policy: DependencyPolicy, workspace: &Workspace) -> bool {
    if !policy.auto_install {
        return false;
    }
    !policy.check_presence || !workspace.node_modules().exists()
}

/// Run `npm install` in the workspace when the dependency policy asks for it.
/// Returns whether the installer ran. The installer is killed if it outlives
/// `install_timeout`.
pub async fn install_dependencies(config: &Configuration, workspace: &Workspace) -> Result<bool> {
    if !needs_install(config.dependency_policy(), workspace) {
        debug!("[{}] skipping dependency installation", config.label());
        return Ok(false);
    }

    info!("[{}] installing npm dependencies...", config.label());
    let npm = config.npm_binary();
    let child = Command::new(npm)
        .arg("install")
        .current_dir(workspace.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            program: npm.to_path_buf(),
            source,
        })?;

    let limit = config.install_timeout();
    // Dropping the timed-out future drops the child, and kill_on_drop reaps it.
    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| Error::workspace(workspace.path(), e))?,
        Err(_) => return Err(Error::DependencyInstallTimeout { timeout: limit }),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(Error::DependencyInstall {
            output: format!("{}: {} {}", output.status, stdout.trim(), stderr.trim()),
        });
    }
    info!("[{}] npm install completed: {}", config.label(), stdout.trim());
    Ok(true)
}
