// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Readiness checks. [`is_accepting`] is the cheap transport-level check used
//! while starting; [`check_connection`] does a full query round trip. Neither
//! returns an error: every failure is `false`.

use crate::config::{Configuration, DEFAULT_TCP_PORT, Transport};
use async_trait::async_trait;
use log::debug;
use sqlx::Connection as _;
use sqlx::PgConnection;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use tokio::time::{Duration, timeout};

/// Bound on a single raw connect attempt.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);
/// Bound on connecting plus one query.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// True when something accepts a connection on the configured endpoint. In
/// Unix mode the socket file must exist as well.
pub async fn is_accepting(transport: &Transport) -> bool {
    match transport {
        Transport::Tcp { host, port } => {
            let connect = tokio::net::TcpStream::connect((host.as_str(), *port));
            matches!(timeout(ACCEPT_TIMEOUT, connect).await, Ok(Ok(_)))
        }
        Transport::Unix { socket_path } => {
            if !socket_path.exists() {
                return false;
            }
            #[cfg(unix)]
            {
                let connect = tokio::net::UnixStream::connect(socket_path);
                matches!(timeout(ACCEPT_TIMEOUT, connect).await, Ok(Ok(_)))
            }
            #[cfg(not(unix))]
            {
                false
            }
        }
    }
}

pub fn connect_options(config: &Configuration) -> PgConnectOptions {
    let (user, password, database) = config.credentials();
    let options = PgConnectOptions::new_without_pgpass()
        .username(user)
        .password(password)
        .database(database)
        .ssl_mode(PgSslMode::Disable);
    match config.transport() {
        Transport::Tcp { host, port } => options.host(host).port(*port),
        // sqlx appends `.s.PGSQL.<port>` to the directory.
        Transport::Unix { socket_path } => {
            let dir = socket_path.parent().unwrap_or(socket_path);
            options.socket(dir).port(DEFAULT_TCP_PORT)
        }
    }
}

async fn query_one<T>(config: &Configuration, sql: &'static str) -> Result<T, String>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Send + Unpin + 'static,
{
    let round_trip = async {
        let mut conn = PgConnection::connect_with(&connect_options(config)).await?;
        let value = sqlx::query_scalar::<_, T>(sql).fetch_one(&mut conn).await?;
        conn.close().await?;
        Ok::<T, sqlx::Error>(value)
    };
    match timeout(QUERY_TIMEOUT, round_trip).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no answer within {}s", QUERY_TIMEOUT.as_secs())),
    }
}

/// Connect with the configured credentials and run `SELECT 1`.
pub async fn check_connection(config: &Configuration) -> bool {
    match query_one::<i32>(config, "SELECT 1").await {
        Ok(1) => true,
        Ok(other) => {
            debug!("[{}] SELECT 1 returned {other}", config.label());
            false
        }
        Err(e) => {
            debug!(
                "[{}] connection check against {} failed: {e}",
                config.label(),
                config.transport()
            );
            false
        }
    }
}

/// Server version string, or `None` when the engine cannot be queried.
pub async fn database_version(config: &Configuration) -> Option<String> {
    match query_one::<String>(config, "SELECT version()").await {
        Ok(version) => Some(version),
        Err(e) => {
            debug!("[{}] version query failed: {e}", config.label());
            None
        }
    }
}

/// One readiness attempt. Implementations must not have side effects on the engine.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, config: &Configuration) -> bool;
}

/// Full round trip through the Postgres protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryProbe;

#[async_trait]
impl ReadinessProbe for QueryProbe {
    async fn probe(&self, config: &Configuration) -> bool {
        check_connection(config).await
    }
}

/// Transport-level check only; useful when no Postgres protocol speaker is behind the endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptProbe;

#[async_trait]
impl ReadinessProbe for AcceptProbe {
    async fn probe(&self, config: &Configuration) -> bool {
        is_accepting(config.transport()).await
    }
}
