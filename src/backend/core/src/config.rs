//! Configuration management.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::logging::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Royalty calculation configuration
    #[serde(default)]
    pub royalty: RoyaltyConfig,

    /// Dependency graph configuration
    #[serde(default)]
    pub graph: GraphConfig,

    /// Artifact source configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Maintenance sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Event ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on a locked database
    #[serde(default = "default_busy_timeout", with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoyaltyConfig {
    /// Deepest dependency level that still earns a share
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Minimum rate in basis points for any level within `max_depth`
    #[serde(default = "default_floor_rate_bps")]
    pub floor_rate_bps: u32,
}

impl Default for RoyaltyConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            floor_rate_bps: default_floor_rate_bps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Upper bound on distinct artifacts visited by one traversal
    #[serde(default = "default_max_closure_size")]
    pub max_closure_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_closure_size: default_max_closure_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the artifact source; unset means no remote lookups
    pub base_url: Option<String>,

    /// JSON catalog of artifacts served locally when `base_url` is unset
    pub catalog_file: Option<PathBuf>,

    /// Per-attempt request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Attempts per artifact before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per attempt
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Ceiling for retry delays
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            catalog_file: None,
            request_timeout: default_request_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Run the periodic sweep
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,

    /// Time between sweeps
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Sweep once immediately at startup
    #[serde(default = "default_sweep_on_start")]
    pub run_on_start: bool,

    /// Most unsettled sales taken per sweep
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval: default_sweep_interval(),
            run_on_start: default_sweep_on_start(),
            batch_size: default_sweep_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Capacity of the inbound event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// JSON-lines file of events replayed at startup
    pub replay_file: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            replay_file: None,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 3000 }
fn default_database_url() -> String { "sqlite://cascade.db".to_string() }
fn default_max_connections() -> u32 { 8 }
fn default_busy_timeout() -> Duration { Duration::from_secs(5) }
fn default_max_depth() -> u32 { 5 }
fn default_floor_rate_bps() -> u32 { 10 }
fn default_max_closure_size() -> usize { 4096 }
fn default_request_timeout() -> Duration { Duration::from_secs(5) }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff() -> Duration { Duration::from_millis(200) }
fn default_max_backoff() -> Duration { Duration::from_secs(2) }
fn default_sweep_enabled() -> bool { true }
fn default_sweep_interval() -> Duration { Duration::from_secs(60) }
fn default_sweep_on_start() -> bool { true }
fn default_sweep_batch_size() -> u32 { 500 }
fn default_channel_capacity() -> usize { 1024 }

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            royalty: RoyaltyConfig::default(),
            graph: GraphConfig::default(),
            upstream: UpstreamConfig::default(),
            sweep: SweepConfig::default(),
            ingest: IngestConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment (`CASCADE__SECTION__KEY`).
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CASCADE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CASCADE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.royalty.max_depth, 5);
        assert_eq!(config.royalty.floor_rate_bps, 10);
        assert!(config.upstream.base_url.is_none());
        assert_eq!(config.sweep.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[royalty]
max_depth = 3

[sweep]
interval = "15s"

[upstream]
base_url = "http://localhost:9000"
request_timeout = "750ms"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.royalty.max_depth, 3);
        assert_eq!(config.royalty.floor_rate_bps, 10);
        assert_eq!(config.sweep.interval, Duration::from_secs(15));
        assert_eq!(config.upstream.request_timeout, Duration::from_millis(750));
        assert_eq!(config.upstream.base_url.as_deref(), Some("http://localhost:9000"));
    }
}
