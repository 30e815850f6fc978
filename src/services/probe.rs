// src/services/probe.rs

//! Broker connectivity gate.
//!
//! Blocks startup until a TCP connection to the broker succeeds. Failures are
//! treated as transient: the probe logs, waits a fixed interval and tries
//! again, with no attempt limit. The probe connection is closed right away;
//! the Kafka client opens its own.

use std::fmt;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::ProbeConfig;

/// A `host:port` pair to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a single `host:port` address.
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            AppError::validation(format!("broker address '{address}' is not host:port"))
        })?;
        if host.is_empty() {
            return Err(AppError::validation(format!(
                "broker address '{address}' has no host"
            )));
        }
        let port = port.parse().map_err(|_| {
            AppError::validation(format!("broker address '{address}' has an invalid port"))
        })?;
        Ok(Self::new(host, port))
    }

    /// Pick the first entry of a comma-separated bootstrap list.
    pub fn from_bootstrap(servers: &str) -> Result<Self> {
        let first = servers
            .split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())
            .ok_or_else(|| AppError::validation("broker.bootstrap_servers is empty"))?;
        Self::parse(first)
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Wait until `target` accepts a TCP connection.
pub async fn wait_for_broker(
    target: &ProbeTarget,
    settings: &ProbeConfig,
    shutdown: &CancellationToken,
) -> Result<()> {
    probe_until_reachable(
        target,
        settings.connect_timeout(),
        settings.retry_interval(),
        shutdown,
    )
    .await
    .map(|_| ())
}

/// Retry loop behind [`wait_for_broker`]. Returns the number of attempts made.
pub async fn probe_until_reachable(
    target: &ProbeTarget,
    connect_timeout: Duration,
    retry_interval: Duration,
    shutdown: &CancellationToken,
) -> Result<u32> {
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        let attempt = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                return Err(AppError::cancelled(format!("waiting for broker at {target}")));
            }
            result = tokio::time::timeout(
                connect_timeout,
                TcpStream::connect((target.host.as_str(), target.port)),
            ) => result,
        };

        match attempt {
            Ok(Ok(_stream)) => {
                log::info!("Broker is available at {target} (attempt {attempts})");
                return Ok(attempts);
            }
            Ok(Err(e)) => {
                log::warn!("Waiting for broker at {target}... ({e})");
            }
            Err(_) => {
                log::warn!(
                    "Waiting for broker at {target}... (connect timed out after {:?})",
                    connect_timeout
                );
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                return Err(AppError::cancelled(format!("waiting for broker at {target}")));
            }
            _ = tokio::time::sleep(retry_interval) => {}
        }
    }
}
