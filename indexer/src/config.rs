/// Configuration module
/// Loads every environment-variable knob named in spec §6 into typed,
/// validated structs, following the teacher's from_env() layering.
use std::env;
use std::time::Duration;

use shared::{FactoryEntry, FactoryRegistry};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// RPC/network configuration (spec §6 Ledger source, §10.3).
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub rpc_url: String,
    pub network: String,
    pub request_timeout: Duration,
    pub max_idle_conns: usize,
    pub max_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub keepalive: bool,
    pub compression: bool,
}

impl SourceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = env::var("RPC_URL").map_err(|_| ConfigError::MissingEnv("RPC_URL".into()))?;
        let network = env::var("NETWORK").unwrap_or_else(|_| "testnet".to_string());

        let request_timeout = Duration::from_secs(parse_env("RPC_REQUEST_TIMEOUT_SECS", 30)?);
        let max_idle_conns = parse_env("RPC_MAX_IDLE_CONNS", 32)?;
        let max_conns_per_host = parse_env("RPC_MAX_CONNS_PER_HOST", 16)?;
        let idle_conn_timeout = Duration::from_secs(parse_env("RPC_IDLE_CONN_TIMEOUT_SECS", 90)?);
        let keepalive = parse_env("RPC_KEEPALIVE", true)?;
        let compression = parse_env("RPC_COMPRESSION", true)?;

        Ok(SourceConfig {
            rpc_url,
            network,
            request_timeout,
            max_idle_conns,
            max_conns_per_host,
            idle_conn_timeout,
            keepalive,
            compression,
        })
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let connection_string =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL".into()))?;
        let max_connections = parse_env("DB_MAX_CONNECTIONS", 10u32)?;
        Ok(DatabaseConfig { connection_string, max_connections })
    }
}

/// Retry strategy configuration (spec §4.6).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(RetryConfig {
            enabled: parse_env("RETRY_ENABLED", true)?,
            max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 10u32)?,
            initial_delay: Duration::from_millis(parse_env("RETRY_INITIAL_DELAY_MS", 500u64)?),
            max_delay: Duration::from_millis(parse_env("RETRY_MAX_DELAY_MS", 30_000u64)?),
        })
    }
}

/// Pipeline (parallel-mode) configuration (spec §4.7).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub auto_enable_lag: u32,
    pub auto_disable_lag: u32,
    pub worker_count: usize,
    pub results_buffer: usize,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let default_workers = ((num_cpus::get() as f64) * 0.75).ceil().max(2.0) as usize;
        Ok(PipelineConfig {
            auto_enable_lag: parse_env("PIPELINE_AUTO_ENABLE_LAG", 50u32)?,
            auto_disable_lag: parse_env("PIPELINE_AUTO_DISABLE_LAG", 20u32)?,
            worker_count: parse_env("PIPELINE_WORKERS", default_workers)?,
            results_buffer: parse_env("PIPELINE_RESULTS_BUFFER", 256usize)?,
        })
    }
}

/// Top-level service configuration combining every section.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub source: SourceConfig,
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub factories: FactoryRegistry,
    /// 0 means "latest minus 10" (spec §6).
    pub start_ledger: u32,
    pub checkpoint_interval: u32,
    pub metrics_port: u16,
    pub buffer_size: usize,
    /// First-topic event-type prefix an event must match to be persisted
    /// (spec §4.4.3).
    pub event_type_prefix: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let source = SourceConfig::from_env()?;
        let database = DatabaseConfig::from_env()?;
        let retry = RetryConfig::from_env()?;
        let pipeline = PipelineConfig::from_env()?;
        let factories = parse_factory_registry(&env::var("FACTORY_CONTRACTS").unwrap_or_default())?;

        if factories.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "FACTORY_CONTRACTS must name at least one factory contract".into(),
            ));
        }

        let start_ledger = parse_env("START_LEDGER", 0u32)?;
        let checkpoint_interval = parse_env("CHECKPOINT_INTERVAL", 50u32)?;
        let metrics_port = parse_env("METRICS_PORT", 9090u16)?;
        let buffer_size = parse_env("BUFFER_SIZE", 256usize)?;
        let event_type_prefix = env::var("EVENT_TYPE_PREFIX").unwrap_or_default();

        info!(
            network = source.network,
            factories = factories.len(),
            start_ledger,
            checkpoint_interval,
            "service configuration loaded"
        );

        Ok(ServiceConfig {
            source,
            database,
            retry,
            pipeline,
            factories,
            start_ledger,
            checkpoint_interval,
            metrics_port,
            buffer_size,
            event_type_prefix,
        })
    }
}

/// Parses `FACTORY_CONTRACTS=id1:kind1,id2:kind2` (spec §6).
fn parse_factory_registry(raw: &str) -> Result<FactoryRegistry, ConfigError> {
    let mut entries = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, kind) = item.split_once(':').ok_or_else(|| {
            ConfigError::InvalidConfig(format!("invalid FACTORY_CONTRACTS entry: {item}"))
        })?;
        if id.is_empty() || kind.is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "invalid FACTORY_CONTRACTS entry: {item}"
            )));
        }
        entries.push(FactoryEntry { factory_id: id.to_string(), kind: kind.to_string() });
    }
    Ok(FactoryRegistry::new(entries))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidConfig(format!("invalid value for {key}: {v}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_factory_registry_entries() {
        let registry = parse_factory_registry("CFAC1:token, CFAC2:pool").unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.kind_of("CFAC1"), Some("token"));
        assert_eq!(registry.kind_of("CFAC2"), Some("pool"));
    }

    #[test]
    fn empty_factory_registry_string_yields_empty_registry() {
        let registry = parse_factory_registry("").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn malformed_factory_entry_is_rejected() {
        assert!(parse_factory_registry("CFAC1-token").is_err());
        assert!(parse_factory_registry("CFAC1:").is_err());
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        env::remove_var("INDEXER_CONFIG_TEST_KEY");
        let v: u32 = parse_env("INDEXER_CONFIG_TEST_KEY", 42).unwrap();
        assert_eq!(v, 42);
    }
}
