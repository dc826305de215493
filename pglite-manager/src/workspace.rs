// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-instance working directory: dependency manifest, launch description and
//! the launcher script. The manifest and launcher are written only if they do
//! not exist yet, so hand edits survive reuse. The launch description carries
//! per-session values and is rewritten whenever it differs from the current
//! configuration.

use crate::config::{Configuration, Transport};
use crate::error::{Error, Result};
use crate::extensions::ExtensionImport;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LAUNCHER_FILE_NAME: &str = "pglite_manager.js";
pub const MANIFEST_FILE_NAME: &str = "package.json";
pub const LAUNCH_SPEC_FILE_NAME: &str = "pglite_launch.json";

pub const ENGINE_PACKAGE: &str = "@electric-sql/pglite";
const ENGINE_VERSION: &str = "^0.3.0";
const SOCKET_SERVER_PACKAGE: &str = "@electric-sql/pglite-socket";
const SOCKET_SERVER_VERSION: &str = "^0.0.8";

/// Fixed launcher. Everything instance-specific is read from the launch
/// description at runtime, never spliced into the source.
const LAUNCHER_SCRIPT: &str = r#"const { PGlite } = require('@electric-sql/pglite');
const { PGLiteSocketServer } = require('@electric-sql/pglite-socket');
const { existsSync, unlinkSync } = require('fs');
const path = require('path');

const launch = require(path.join(__dirname, 'pglite_launch.json'));

function loadExtensions() {
    const extensions = {};
    for (const ext of launch.extensions) {
        extensions[ext.registry_key] = require(ext.module_path)[ext.import_name];
    }
    return extensions;
}

function removeStaleSocket(socketPath) {
    if (existsSync(socketPath)) {
        try {
            unlinkSync(socketPath);
            console.log(`Removed old socket at ${socketPath}`);
        } catch (err) {
            // Ignore errors during cleanup
        }
    }
}

async function startServer() {
    try {
        const db = new PGlite({ extensions: loadExtensions() });
        const transport = launch.transport;
        let server;
        let where;
        if (transport.mode === 'tcp') {
            server = new PGLiteSocketServer({ db, host: transport.host, port: transport.port });
            where = `TCP ${transport.host}:${transport.port}`;
        } else {
            removeStaleSocket(transport.socket_path);
            server = new PGLiteSocketServer({ db, path: transport.socket_path });
            where = `socket ${transport.socket_path}`;
        }
        await server.start();
        console.log(`Server started on ${where}`);

        const shutdown = async (signal) => {
            console.log(`Received ${signal}, shutting down gracefully...`);
            try {
                await server.stop();
                await db.close();
                console.log('Server stopped and database closed');
            } catch (err) {
                console.error('Error during shutdown:', err);
            }
            process.exit(0);
        };
        process.on('SIGINT', () => shutdown('SIGINT'));
        process.on('SIGTERM', () => shutdown('SIGTERM'));
        process.on('exit', () => console.log('Process exiting...'));
    } catch (err) {
        console.error('Failed to start PGlite server:', err);
        process.exit(1);
    }
}

startServer();
"#;

/// Structured description of what the launcher should start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub transport: Transport,
    pub extensions: Vec<ExtensionImport>,
}

impl LaunchSpec {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            transport: config.transport().clone(),
            extensions: config.extension_imports(),
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(LAUNCH_SPEC_FILE_NAME);
        let contents = std::fs::read_to_string(&path).map_err(|e| Error::workspace(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| Error::workspace(&path, e.into()))
    }
}

#[derive(Debug, Serialize)]
struct PackageManifest {
    name: &'static str,
    version: &'static str,
    description: &'static str,
    scripts: BTreeMap<&'static str, String>,
    dependencies: BTreeMap<String, &'static str>,
}

impl PackageManifest {
    fn for_extensions(extensions: &[ExtensionImport]) -> Self {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(ENGINE_PACKAGE.to_string(), ENGINE_VERSION);
        dependencies.insert(SOCKET_SERVER_PACKAGE.to_string(), SOCKET_SERVER_VERSION);
        // Extensions shipped outside the engine package need their own entry.
        for ext in extensions {
            let package = package_of(&ext.module_path);
            dependencies.entry(package).or_insert("*");
        }

        let mut scripts = BTreeMap::new();
        scripts.insert("start", format!("node {LAUNCHER_FILE_NAME}"));

        Self {
            name: "pglite-manager-env",
            version: env!("CARGO_PKG_VERSION"),
            description: "PGlite test environment for pglite-manager",
            scripts,
            dependencies,
        }
    }
}

/// npm package that provides `module`: `@scope/name/sub` -> `@scope/name`, `name/sub` -> `name`.
fn package_of(module: &str) -> String {
    let segments = if module.starts_with('@') { 2 } else { 1 };
    module
        .split('/')
        .take(segments)
        .collect::<Vec<_>>()
        .join("/")
}

/// Which artifacts a call to [`Workspace::materialize`] actually wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Materialized {
    pub manifest: bool,
    pub launch_spec: bool,
    pub launcher: bool,
}

impl Materialized {
    pub fn any(&self) -> bool {
        self.manifest || self.launch_spec || self.launcher
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Use the configured directory (created if missing) or a fresh private temp directory.
    pub fn resolve(config: &Configuration) -> Result<Self> {
        let dir = match config.work_dir() {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| Error::workspace(dir, e))?;
                dir.to_path_buf()
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("pglite-")
                    .tempdir()
                    .map_err(|e| Error::workspace(std::env::temp_dir(), e))?;
                temp.keep()
            }
        };
        debug!("[{}] workspace at {}", config.label(), dir.display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn launcher_path(&self) -> PathBuf {
        self.dir.join(LAUNCHER_FILE_NAME)
    }

    pub fn node_modules(&self) -> PathBuf {
        self.dir.join("node_modules")
    }

    /// Write missing artifacts and bring the launch description up to date.
    pub fn materialize(&self, config: &Configuration) -> Result<Materialized> {
        let spec = LaunchSpec::from_config(config);

        let manifest = PackageManifest::for_extensions(&spec.extensions);
        let manifest_json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::workspace(self.dir.join(MANIFEST_FILE_NAME), e.into()))?;
        let spec_json = serde_json::to_string_pretty(&spec)
            .map_err(|e| Error::workspace(self.dir.join(LAUNCH_SPEC_FILE_NAME), e.into()))?;

        let written = Materialized {
            manifest: self.write_if_absent(MANIFEST_FILE_NAME, &manifest_json)?,
            launch_spec: self.write_if_changed(LAUNCH_SPEC_FILE_NAME, &spec_json)?,
            launcher: self.write_if_absent(LAUNCHER_FILE_NAME, LAUNCHER_SCRIPT)?,
        };
        if written.any() {
            info!(
                "[{}] generated workspace files in {} ({written:?})",
                config.label(),
                self.dir.display()
            );
        } else {
            debug!("[{}] reusing existing workspace files", config.label());
        }
        Ok(written)
    }

    fn write_if_absent(&self, name: &str, contents: &str) -> Result<bool> {
        let path = self.dir.join(name);
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(Error::workspace(path, e)),
        };
        file.write_all(contents.as_bytes())
            .map_err(|e| Error::workspace(&path, e))?;
        Ok(true)
    }

    fn write_if_changed(&self, name: &str, contents: &str) -> Result<bool> {
        let path = self.dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(current) if current == contents => return Ok(false),
            Ok(_) => debug!("replacing outdated {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::workspace(path, e)),
        }
        std::fs::write(&path, contents).map_err(|e| Error::workspace(&path, e))?;
        Ok(true)
    }
}
