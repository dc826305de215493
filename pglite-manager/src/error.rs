// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Construction-time validation failure. `field` names the first offending setting.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The engine exited before it became reachable.
    #[error("engine process died during startup. Output: {output}")]
    StartupFailed { output: String },

    /// The engine never became reachable; the child has already been terminated.
    #[error("engine failed to start within {} seconds", .timeout.as_secs_f64())]
    StartupTimeout { timeout: Duration },

    #[error("engine is not running, call start() first")]
    NotRunning,

    #[error("failed to prepare workspace {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dependency installation failed: {output}")]
    DependencyInstall { output: String },

    #[error("dependency installation did not finish within {} seconds", .timeout.as_secs())]
    DependencyInstallTimeout { timeout: Duration },

    #[error("failed to load config file {}: {reason}", .path.display())]
    ConfigFile { path: PathBuf, reason: String },
}

impl Error {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Workspace {
            path: path.into(),
            source,
        }
    }

    /// True for the errors a failed `start()` reports about the engine itself,
    /// as opposed to local I/O problems while preparing it.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            Error::StartupFailed { .. } | Error::StartupTimeout { .. }
        )
    }
}
