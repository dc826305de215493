// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Supervises a PGlite engine running under Node.js: builds its workspace,
//! starts it on a Unix socket or TCP port, waits for it to accept
//! connections, and tears it down again.

pub mod config;
pub mod error;
pub mod extensions;
pub mod install;
pub mod probe;
pub mod registry;
pub mod signal;
pub mod state;
pub mod supervisor;
pub mod sweep;
pub mod workspace;

pub use config::{Configuration, ConfigurationBuilder, DependencyPolicy, LogLevel, Transport, load_config};
pub use error::{Error, Result};
pub use probe::{AcceptProbe, QueryProbe, ReadinessProbe, check_connection, database_version, is_accepting};
pub use registry::{Registry, SharedSupervisor};
pub use state::SupervisorState;
pub use supervisor::Supervisor;
