//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// Environment variable naming the broker `host:port`.
pub const ENV_KAFKA_BROKER: &str = "KAFKA_BROKER";
/// Environment variable naming the index store host.
pub const ENV_OPENSEARCH_HOST: &str = "OPENSEARCH_HOST";
/// Environment variable naming the index store port.
pub const ENV_OPENSEARCH_PORT: &str = "OPENSEARCH_PORT";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Kafka connection and subscription
    #[serde(default)]
    pub broker: BrokerConfig,

    /// OpenSearch destination
    #[serde(default)]
    pub index: IndexConfig,

    /// Startup connectivity gate
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Main loop behavior
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup.
    ///
    /// Empty values are ignored so an exported-but-blank variable keeps the
    /// configured default.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(broker) = lookup(ENV_KAFKA_BROKER) {
            self.broker.bootstrap_servers = broker;
        }
        if let Some(host) = lookup(ENV_OPENSEARCH_HOST) {
            self.index.host = host;
        }
        if let Some(port) = lookup(ENV_OPENSEARCH_PORT) {
            self.index.port = port.trim().parse().map_err(|_| {
                AppError::config(format!("{ENV_OPENSEARCH_PORT} is not a valid port: {port}"))
            })?;
        }
        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.broker.topic.trim().is_empty() {
            return Err(AppError::validation("broker.topic is empty"));
        }
        if self.broker.group_id.trim().is_empty() {
            return Err(AppError::validation("broker.group_id is empty"));
        }
        crate::services::ProbeTarget::from_bootstrap(&self.broker.bootstrap_servers)?;
        if self.broker.max_poll_records == 0 {
            return Err(AppError::validation("broker.max_poll_records must be > 0"));
        }
        if self.broker.poll_timeout_ms == 0 {
            return Err(AppError::validation("broker.poll_timeout_ms must be > 0"));
        }
        if self.index.index.trim().is_empty() {
            return Err(AppError::validation("index.index is empty"));
        }
        if self.index.timeout_secs == 0 {
            return Err(AppError::validation("index.timeout_secs must be > 0"));
        }
        self.index.base_url()?;
        if self.probe.connect_timeout_secs == 0 {
            return Err(AppError::validation(
                "probe.connect_timeout_secs must be > 0",
            ));
        }
        if self.pipeline.keyword.is_empty() {
            return Err(AppError::validation("pipeline.keyword is empty"));
        }
        if self.pipeline.retry_max_ms < self.pipeline.retry_initial_ms {
            return Err(AppError::validation(
                "pipeline.retry_max_ms must be >= pipeline.retry_initial_ms",
            ));
        }
        Ok(())
    }
}

/// Kafka consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Comma-separated `host:port` list; the first entry is probed
    #[serde(default = "defaults::bootstrap_servers")]
    pub bootstrap_servers: String,

    /// Topic carrying the log records
    #[serde(default = "defaults::topic")]
    pub topic: String,

    /// Consumer group identity used for committed positions
    #[serde(default = "defaults::group_id")]
    pub group_id: String,

    /// How long a single poll waits for the first record
    #[serde(default = "defaults::poll_timeout")]
    pub poll_timeout_ms: u64,

    /// Upper bound on records handed over per poll
    #[serde(default = "defaults::max_poll_records")]
    pub max_poll_records: usize,

    /// Interval of the consumer's background offset commit
    #[serde(default = "defaults::auto_commit_interval")]
    pub auto_commit_interval_ms: u64,
}

impl BrokerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: defaults::bootstrap_servers(),
            topic: defaults::topic(),
            group_id: defaults::group_id(),
            poll_timeout_ms: defaults::poll_timeout(),
            max_poll_records: defaults::max_poll_records(),
            auto_commit_interval_ms: defaults::auto_commit_interval(),
        }
    }
}

/// OpenSearch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "defaults::index_scheme")]
    pub scheme: String,

    #[serde(default = "defaults::index_host")]
    pub host: String,

    #[serde(default = "defaults::index_port")]
    pub port: u16,

    /// Destination index name
    #[serde(default = "defaults::index_name")]
    pub index: String,

    /// Gzip request bodies
    #[serde(default = "defaults::compress")]
    pub compress: bool,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::index_timeout")]
    pub timeout_secs: u64,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
}

impl IndexConfig {
    /// Root URL of the index store, e.g. `http://opensearch:9200/`.
    pub fn base_url(&self) -> Result<Url> {
        let raw = format!("{}://{}:{}/", self.scheme, self.host, self.port);
        let url = Url::parse(&raw)?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(AppError::validation(format!("index host missing in {raw}")));
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            scheme: defaults::index_scheme(),
            host: defaults::index_host(),
            port: defaults::index_port(),
            index: defaults::index_name(),
            compress: defaults::compress(),
            timeout_secs: defaults::index_timeout(),
            user_agent: defaults::user_agent(),
        }
    }
}

/// Connectivity gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Timeout of one TCP connect attempt
    #[serde(default = "defaults::probe_timeout")]
    pub connect_timeout_secs: u64,

    /// Fixed pause between attempts
    #[serde(default = "defaults::probe_interval")]
    pub retry_interval_secs: u64,
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: defaults::probe_timeout(),
            retry_interval_secs: defaults::probe_interval(),
        }
    }
}

/// When a delivery's position is handed back to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Acknowledge as soon as the record is received. A stop before the
    /// document is indexed loses that anomaly.
    #[default]
    OnReceipt,
    /// Acknowledge only once the record has been fully handled. A stop
    /// before that point redelivers the record.
    AfterIndex,
}

impl std::fmt::Display for CommitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitPolicy::OnReceipt => write!(f, "on_receipt"),
            CommitPolicy::AfterIndex => write!(f, "after_index"),
        }
    }
}

/// Main loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Substring (case-insensitive) that marks a message as anomalous
    #[serde(default = "defaults::keyword")]
    pub keyword: String,

    #[serde(default)]
    pub commit_policy: CommitPolicy,

    /// Sleep after an empty poll
    #[serde(default = "defaults::idle_interval")]
    pub idle_interval_ms: u64,

    /// Extra attempts for a transient index failure (0 = drop immediately)
    #[serde(default)]
    pub index_retries: u32,

    #[serde(default = "defaults::retry_initial")]
    pub retry_initial_ms: u64,

    #[serde(default = "defaults::retry_max")]
    pub retry_max_ms: u64,

    /// How often running totals are logged (0 disables)
    #[serde(default = "defaults::stats_interval")]
    pub stats_interval_secs: u64,

    /// JSON-lines file for dropped records; logged only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_path: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keyword: defaults::keyword(),
            commit_policy: CommitPolicy::default(),
            idle_interval_ms: defaults::idle_interval(),
            index_retries: 0,
            retry_initial_ms: defaults::retry_initial(),
            retry_max_ms: defaults::retry_max(),
            stats_interval_secs: defaults::stats_interval(),
            dead_letter_path: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Broker defaults
    pub fn bootstrap_servers() -> String {
        "kafka:9092".into()
    }
    pub fn topic() -> String {
        "logs".into()
    }
    pub fn group_id() -> String {
        "anomaly-detector".into()
    }
    pub fn poll_timeout() -> u64 {
        500
    }
    pub fn max_poll_records() -> usize {
        100
    }
    pub fn auto_commit_interval() -> u64 {
        5000
    }

    // Index defaults
    pub fn index_scheme() -> String {
        "http".into()
    }
    pub fn index_host() -> String {
        "opensearch".into()
    }
    pub fn index_port() -> u16 {
        9200
    }
    pub fn index_name() -> String {
        "anomalies".into()
    }
    pub fn compress() -> bool {
        true
    }
    pub fn index_timeout() -> u64 {
        10
    }
    pub fn user_agent() -> String {
        concat!("detector/", env!("CARGO_PKG_VERSION")).into()
    }

    // Probe defaults
    pub fn probe_timeout() -> u64 {
        5
    }
    pub fn probe_interval() -> u64 {
        5
    }

    // Pipeline defaults
    pub fn keyword() -> String {
        "error".into()
    }
    pub fn idle_interval() -> u64 {
        1000
    }
    pub fn retry_initial() -> u64 {
        200
    }
    pub fn retry_max() -> u64 {
        5000
    }
    pub fn stats_interval() -> u64 {
        60
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
