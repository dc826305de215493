// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! OS boundary for terminating the engine.
//!
//! The supervisor only talks to a [`Signaler`]. Platforms with process groups get
//! [`UnixSignaler`], which reaches grandchildren spawned by the runtime; everything
//! else gets [`ProcessSignaler`], which can only address the direct child.

use log::{debug, warn};
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM: ask the engine to close its listener and exit.
    Terminate,
    /// SIGKILL.
    Kill,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Terminate => write!(f, "SIGTERM"),
            StopSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

pub trait Signaler: Send + Sync {
    /// Whether `signal_group` can work at all on this platform.
    fn supports_groups(&self) -> bool;

    /// Signal every process in the group led by `pid`.
    fn signal_group(&self, pid: u32, sig: StopSignal) -> io::Result<()>;

    fn signal_process(&self, pid: u32, sig: StopSignal) -> io::Result<()>;
}

/// Group first, then the single process. Returns false when neither was delivered.
pub fn deliver(signaler: &dyn Signaler, label: &str, pid: u32, sig: StopSignal) -> bool {
    if signaler.supports_groups() {
        match signaler.signal_group(pid, sig) {
            Ok(()) => {
                debug!("[{label}] sent {sig} to process group {pid}");
                return true;
            }
            Err(e) => debug!("[{label}] {sig} to process group {pid} failed ({e}), signaling pid only"),
        }
    }
    match signaler.signal_process(pid, sig) {
        Ok(()) => {
            debug!("[{label}] sent {sig} to pid {pid}");
            true
        }
        Err(e) => {
            warn!("[{label}] failed to send {sig} to pid {pid}: {e}");
            false
        }
    }
}

pub fn default_signaler() -> Box<dyn Signaler> {
    #[cfg(unix)]
    {
        Box::new(UnixSignaler)
    }
    #[cfg(not(unix))]
    {
        Box::new(ProcessSignaler)
    }
}

#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSignaler;

#[cfg(unix)]
impl UnixSignaler {
    fn nix_signal(sig: StopSignal) -> nix::sys::signal::Signal {
        match sig {
            StopSignal::Terminate => nix::sys::signal::Signal::SIGTERM,
            StopSignal::Kill => nix::sys::signal::Signal::SIGKILL,
        }
    }

    fn nix_pid(pid: u32) -> io::Result<nix::unistd::Pid> {
        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
        Ok(nix::unistd::Pid::from_raw(raw))
    }
}

#[cfg(unix)]
impl Signaler for UnixSignaler {
    fn supports_groups(&self) -> bool {
        true
    }

    fn signal_group(&self, pid: u32, sig: StopSignal) -> io::Result<()> {
        use nix::unistd::{getpgid, getpgrp};

        let pgid = getpgid(Some(Self::nix_pid(pid)?))?;
        // Never signal our own group.
        if pgid == getpgrp() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("pid {pid} shares the supervisor's process group"),
            ));
        }
        nix::sys::signal::killpg(pgid, Self::nix_signal(sig))?;
        Ok(())
    }

    fn signal_process(&self, pid: u32, sig: StopSignal) -> io::Result<()> {
        nix::sys::signal::kill(Self::nix_pid(pid)?, Self::nix_signal(sig))?;
        Ok(())
    }
}

/// Portable single-process signaling through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSignaler;

impl Signaler for ProcessSignaler {
    fn supports_groups(&self) -> bool {
        false
    }

    fn signal_group(&self, _pid: u32, _sig: StopSignal) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process groups are not supported",
        ))
    }

    fn signal_process(&self, pid: u32, sig: StopSignal) -> io::Result<()> {
        use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = system
            .process(pid)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no process {pid}")))?;
        let sysinfo_signal = match sig {
            StopSignal::Terminate => Signal::Term,
            StopSignal::Kill => Signal::Kill,
        };
        match process.kill_with(sysinfo_signal) {
            Some(true) => Ok(()),
            Some(false) => Err(io::Error::other(format!("failed to send {sig} to {pid}"))),
            None if sig == StopSignal::Kill && process.kill() => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{sig} is not supported on this platform"),
            )),
        }
    }
}
