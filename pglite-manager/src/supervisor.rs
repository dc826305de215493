// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::install::{find_node_modules, install_dependencies};
use crate::probe::{QueryProbe, ReadinessProbe, is_accepting};
use crate::signal::{Signaler, StopSignal, default_signaler, deliver};
use crate::state::SupervisorState;
use crate::sweep;
use crate::workspace::{LAUNCHER_FILE_NAME, Workspace};
use log::{debug, error, info, warn};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, timeout};

/// How long a SIGTERM'd engine gets before SIGKILL.
pub const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const FORCED_STOP_TIMEOUT: Duration = Duration::from_secs(2);
/// Readiness poll interval while starting.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub const DEFAULT_READY_RETRIES: u32 = 15;
pub const DEFAULT_READY_DELAY: Duration = Duration::from_secs(1);

/// Bytes of engine output kept for `StartupFailed`.
const OUTPUT_CAPTURE_LIMIT: usize = 1000;
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Owns one engine process and its workspace.
///
/// Calls on one instance must be serialized by the caller; share it through
/// [`crate::Registry`] when several tasks need it.
pub struct Supervisor {
    config: Configuration,
    state: SupervisorState,
    child: Option<Child>,
    workspace: Option<Workspace>,
    signaler: Box<dyn Signaler>,
    probe: Box<dyn ReadinessProbe>,
    output: Arc<Mutex<String>>,
    readers: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            state: SupervisorState::Stopped,
            child: None,
            workspace: None,
            signaler: default_signaler(),
            probe: Box::new(QueryProbe),
            output: Arc::new(Mutex::new(String::new())),
            readers: Vec::new(),
        }
    }

    pub fn with_signaler(mut self, signaler: Box<dyn Signaler>) -> Self {
        self.signaler = signaler;
        self
    }

    /// Replace the probe used by [`wait_for_ready`](Self::wait_for_ready).
    pub fn with_probe(mut self, probe: impl ReadinessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Pid of the engine (and of its process group), if one was spawned and not yet reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Workspace directory, once the first `start()` resolved it.
    pub fn workspace_dir(&self) -> Option<&Path> {
        self.workspace.as_ref().map(Workspace::path)
    }

    /// Up to the first 1000 bytes the engine wrote to stdout/stderr.
    pub fn captured_output(&self) -> String {
        self.output.lock().map(|out| out.clone()).unwrap_or_default()
    }

    fn label(&self) -> &str {
        self.config.label()
    }

    fn set_state(&mut self, next: SupervisorState) {
        if !self.state.can_transition_to(next) {
            warn!(
                "[{}] unexpected state transition {} -> {next}",
                self.label(),
                self.state
            );
        }
        debug!("[{}] {} -> {next}", self.label(), self.state);
        self.state = next;
    }

    /// Start the engine and wait until its endpoint accepts connections.
    /// No-op when already running.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            info!("[{}] engine already running", self.label());
            return Ok(());
        }

        self.set_state(SupervisorState::Starting);
        match self.launch().await {
            Ok(()) => {
                self.set_state(SupervisorState::Running);
                info!(
                    "[{}] engine started on {} (pid={})",
                    self.label(),
                    self.config.transport(),
                    self.pid().unwrap_or(0)
                );
                Ok(())
            }
            Err(e) => {
                self.terminate_owned().await;
                self.drain_output().await;
                self.set_state(SupervisorState::Stopped);
                error!("[{}] failed to start engine: {e}", self.label());
                Err(e)
            }
        }
    }

    async fn launch(&mut self) -> Result<()> {
        let workspace = match self.workspace.clone() {
            Some(workspace) => workspace,
            None => {
                let workspace = Workspace::resolve(&self.config)?;
                self.workspace = Some(workspace.clone());
                workspace
            }
        };

        self.kill_stale(&workspace).await;
        self.remove_socket_file();
        self.ensure_socket_dir()?;

        workspace.materialize(&self.config)?;
        install_dependencies(&self.config, &workspace).await?;

        self.spawn_engine(&workspace)?;
        self.wait_until_accepting().await
    }

    async fn kill_stale(&self, workspace: &Workspace) {
        let dir = workspace.path().to_path_buf();
        match tokio::task::spawn_blocking(move || sweep::kill_stale_in(&dir)).await {
            Ok(0) => {}
            Ok(n) => info!("[{}] killed {n} stale engine process(es)", self.label()),
            Err(e) => warn!("[{}] stale process sweep failed: {e}", self.label()),
        }
    }

    fn spawn_engine(&mut self, workspace: &Workspace) -> Result<()> {
        let node = self.config.node_binary();
        let mut cmd = Command::new(node);
        cmd.arg(LAUNCHER_FILE_NAME)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so signals reach anything the runtime spawns.
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(options) = self.config.node_options() {
            info!("[{}] using NODE_OPTIONS: {options}", self.label());
            cmd.env("NODE_OPTIONS", options);
        }
        match find_node_modules(workspace.path()) {
            Some(node_modules) => {
                debug!("[{}] NODE_PATH={}", self.label(), node_modules.display());
                cmd.env("NODE_PATH", node_modules);
            }
            None => debug!("[{}] no node_modules found, NODE_PATH unset", self.label()),
        }

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: node.to_path_buf(),
            source,
        })?;
        info!(
            "[{}] spawned {} {LAUNCHER_FILE_NAME} (pid={})",
            self.label(),
            node.display(),
            child.id().unwrap_or(0)
        );

        if let Ok(mut out) = self.output.lock() {
            out.clear();
        }
        self.abort_readers();
        if let Some(stdout) = child.stdout.take() {
            let reader = self.spawn_reader(stdout);
            self.readers.push(reader);
        }
        if let Some(stderr) = child.stderr.take() {
            let reader = self.spawn_reader(stderr);
            self.readers.push(reader);
        }
        self.child = Some(child);
        Ok(())
    }

    fn spawn_reader<R>(&self, stream: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let label = self.label().to_string();
        let output = Arc::clone(&self.output);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[{label}] {line}");
                if let Ok(mut out) = output.lock() {
                    append_capped(&mut out, &line);
                }
            }
        })
    }

    async fn wait_until_accepting(&mut self) -> Result<()> {
        let limit = self.config.timeout();
        let deadline = Instant::now() + limit;
        info!(
            "[{}] waiting up to {}s for {}",
            self.label(),
            limit.as_secs_f64(),
            self.config.transport()
        );

        loop {
            if let Some(child) = self.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        warn!("[{}] engine exited during startup with {status}", self.label());
                        self.drain_output().await;
                        let output = self.captured_output();
                        return Err(Error::StartupFailed {
                            output: if output.is_empty() {
                                "No output".to_string()
                            } else {
                                output
                            },
                        });
                    }
                    Ok(None) => {}
                    Err(e) => warn!("[{}] failed to poll engine: {e}", self.label()),
                }
            }

            if is_accepting(self.config.transport()).await {
                return Ok(());
            }

            if Instant::now() >= deadline {
                warn!("[{}] engine startup timed out, terminating", self.label());
                return Err(Error::StartupTimeout { timeout: limit });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Stop the engine. Never fails; problems are logged.
    pub async fn stop(&mut self) {
        if self.state == SupervisorState::Stopped && self.child.is_none() {
            debug!("[{}] engine already stopped", self.label());
            return;
        }

        info!("[{}] stopping engine", self.label());
        self.set_state(SupervisorState::Stopping);
        self.terminate_owned().await;

        // Last resort for launchers that escaped the group signals. This also
        // hits engines owned by other supervisors on the host.
        match tokio::task::spawn_blocking(sweep::kill_all_launchers).await {
            Ok(0) => {}
            Ok(n) => warn!("[{}] killed {n} leftover engine process(es)", self.label()),
            Err(e) => warn!("[{}] leftover process sweep failed: {e}", self.label()),
        }

        self.drain_output().await;
        if self.config.cleanup_on_exit() {
            self.cleanup_socket();
        }
        self.set_state(SupervisorState::Stopped);
        info!("[{}] engine stopped", self.label());
    }

    /// SIGTERM the owned group, then SIGKILL if it lingers. Clears the child handle.
    async fn terminate_owned(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let label = self.config.label().to_string();

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("[{label}] engine already exited with {status}");
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("[{label}] failed to poll engine: {e}"),
        }
        let Some(pid) = child.id() else {
            return;
        };

        deliver(self.signaler.as_ref(), &label, pid, StopSignal::Terminate);
        match timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                info!("[{label}] engine stopped gracefully ({status})");
                return;
            }
            Ok(Err(e)) => warn!("[{label}] failed to wait for engine: {e}"),
            Err(_) => warn!(
                "[{label}] engine did not exit within {}s, sending SIGKILL",
                GRACEFUL_STOP_TIMEOUT.as_secs()
            ),
        }

        deliver(self.signaler.as_ref(), &label, pid, StopSignal::Kill);
        match timeout(FORCED_STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => info!("[{label}] engine stopped forcefully ({status})"),
            Ok(Err(e)) => warn!("[{label}] failed to wait for engine: {e}"),
            Err(_) => error!("[{label}] engine pid {pid} survived SIGKILL"),
        }
    }

    pub async fn restart(&mut self) -> Result<()> {
        if self.is_running() {
            self.stop().await;
        }
        self.start().await
    }

    /// Whether the engine is alive. Notices an engine that died on its own
    /// and moves to `Stopped`.
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => self.state.is_running(),
            Ok(Some(status)) => {
                warn!("[{}] engine exited unexpectedly with {status}", self.label());
                self.child = None;
                self.abort_readers();
                if self.config.cleanup_on_exit() {
                    self.cleanup_socket();
                }
                self.set_state(SupervisorState::Stopped);
                false
            }
            Err(e) => {
                warn!("[{}] failed to poll engine: {e}", self.label());
                false
            }
        }
    }

    /// Probe the configured endpoint up to `max_retries` times, `delay` apart.
    /// Returns false once attempts are exhausted; never errors.
    pub async fn wait_for_ready(&self, max_retries: u32, delay: Duration) -> bool {
        for attempt in 1..=max_retries {
            if self.probe.probe(&self.config).await {
                info!("[{}] database ready after {attempt} attempt(s)", self.label());
                sleep(SETTLE_DELAY).await;
                return true;
            }
            if attempt < max_retries {
                warn!(
                    "[{}] database not ready (attempt {attempt}/{max_retries})",
                    self.label()
                );
                sleep(delay).await;
            }
        }
        error!(
            "[{}] database failed to become ready after {max_retries} attempts",
            self.label()
        );
        false
    }

    fn require_running(&mut self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    pub fn connection_string(&mut self, driver: &str) -> Result<String> {
        self.require_running()?;
        Ok(self.config.connection_string(driver))
    }

    pub fn uri(&mut self) -> Result<String> {
        self.require_running()?;
        Ok(self.config.uri())
    }

    pub fn asyncpg_uri(&mut self) -> Result<String> {
        self.require_running()?;
        Ok(self.config.asyncpg_uri())
    }

    pub fn dsn(&mut self) -> Result<String> {
        self.require_running()?;
        Ok(self.config.dsn())
    }

    fn ensure_socket_dir(&self) -> Result<()> {
        let Some(dir) = self.config.socket_dir() else {
            return Ok(());
        };
        if dir.is_dir() {
            return Ok(());
        }
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(dir).map_err(|e| Error::workspace(dir, e))
    }

    fn remove_socket_file(&self) {
        let Some(path) = self.config.transport().socket_path() else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => info!("[{}] removed stale socket {}", self.label(), path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "[{}] failed to remove socket {}: {e}",
                self.label(),
                path.display()
            ),
        }
    }

    /// Remove the socket file, and the socket directory too when it was generated.
    fn cleanup_socket(&self) {
        self.remove_socket_file();
        if self.config.owns_socket_dir()
            && let Some(dir) = self.config.socket_dir()
            && let Err(e) = std::fs::remove_dir(dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!(
                "[{}] left socket directory {} in place: {e}",
                self.label(),
                dir.display()
            );
        }
    }

    /// Let the output readers see EOF, then stop waiting for them.
    async fn drain_output(&mut self) {
        for mut reader in std::mem::take(&mut self.readers) {
            if timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader).await.is_err() {
                reader.abort();
            }
        }
    }

    fn abort_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut()
            && matches!(child.try_wait(), Ok(None))
            && let Some(pid) = child.id()
        {
            let label = self.config.label();
            warn!("[{label}] supervisor dropped while engine is running, killing pid {pid}");
            deliver(self.signaler.as_ref(), label, pid, StopSignal::Kill);
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}

fn append_capped(buf: &mut String, line: &str) {
    let room = OUTPUT_CAPTURE_LIMIT.saturating_sub(buf.len());
    if room == 0 {
        return;
    }
    let mut end = line.len().min(room);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    buf.push_str(&line[..end]);
    if buf.len() < OUTPUT_CAPTURE_LIMIT {
        buf.push('\n');
    }
}
