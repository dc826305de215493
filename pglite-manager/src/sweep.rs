// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Command-line based process sweeps.
//!
//! Both sweeps match on the launcher filename appearing anywhere in a process's
//! arguments. That is a broad approximation: [`kill_all_launchers`] also hits
//! engines owned by other supervisors, so it only runs after the owned process
//! group has already been signaled.

use crate::workspace::LAUNCHER_FILE_NAME;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

const SWEEP_WAIT: Duration = Duration::from_secs(5);
const SWEEP_POLL: Duration = Duration::from_millis(50);

/// Kill launcher processes left over from a previous run in `dir`.
pub fn kill_stale_in(dir: &Path) -> usize {
    let target = canonical(dir);
    sweep(Some(&target), "stale")
}

/// Kill every launcher process on the system, regardless of owner.
pub fn kill_all_launchers() -> usize {
    sweep(None, "leftover")
}

fn canonical(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

fn sweep(cwd: Option<&Path>, kind: &str) -> usize {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing()
            .with_cmd(UpdateKind::Always)
            .with_cwd(UpdateKind::Always),
    );

    let victims = matching_pids(&system, cwd);
    if victims.is_empty() {
        return 0;
    }

    let mut killed = Vec::new();
    for pid in victims {
        let Some(process) = system.process(pid) else {
            continue;
        };
        info!("killing {kind} engine process {pid}");
        if process.kill() {
            killed.push(pid);
        } else {
            warn!("failed to kill {kind} engine process {pid}");
        }
    }

    let survivors = wait_for_exit(&mut system, &killed, SWEEP_WAIT);
    if !survivors.is_empty() {
        warn!("{kind} engine processes still alive after SIGKILL: {survivors:?}");
    }
    if !killed.is_empty() {
        info!("killed {} {kind} engine process(es): {killed:?}", killed.len());
    }
    killed.len()
}

fn matching_pids(system: &System, cwd: Option<&Path>) -> Vec<Pid> {
    let me = sysinfo::get_current_pid().ok();
    let mut pids: Vec<Pid> = system
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != me)
        .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
        .filter(|(_, process)| {
            process
                .cmd()
                .iter()
                .any(|arg| arg.to_string_lossy().contains(LAUNCHER_FILE_NAME))
        })
        .filter(|(_, process)| match cwd {
            Some(target) => process.cwd().is_some_and(|dir| dir == target),
            None => true,
        })
        .map(|(pid, _)| *pid)
        .collect();
    pids.sort_unstable();
    pids
}

/// Returns the pids still alive when `timeout` runs out. Zombies count as exited.
fn wait_for_exit(system: &mut System, pids: &[Pid], timeout: Duration) -> Vec<Pid> {
    let deadline = Instant::now() + timeout;
    loop {
        system.refresh_processes(ProcessesToUpdate::Some(pids), true);
        let alive: Vec<Pid> = pids
            .iter()
            .copied()
            .filter(|pid| {
                system
                    .process(*pid)
                    .is_some_and(|p| p.status() != ProcessStatus::Zombie)
            })
            .collect();
        if alive.is_empty() || Instant::now() >= deadline {
            return alive;
        }
        std::thread::sleep(SWEEP_POLL);
    }
}
