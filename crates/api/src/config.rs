//! Application configuration loaded from environment variables.

use std::time::Duration;

use broker::InMemoryBrokerConfig;
use saga::{
    CompensatorConfig, CoordinatorConfig, Deadlines, ScannerConfig, StatusSource, Topics,
};

/// Server and transaction-flow configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; unset keeps orders in memory
/// - `MACHINE_ID`: order id generator machine component (default `1`)
/// - `PAY_TIMEOUT_SECS`: delay of the pay-timeout message (default `30`)
/// - `RPC_TIMEOUT_MS` / `BROKER_TIMEOUT_MS`: per-call deadlines (default `3000`)
/// - `MAX_RECONSUME_TIMES`: dead-letter ceiling (default `3`)
/// - `BROKER_RETAIN_MESSAGES`: visible messages the in-process broker keeps (default `10000`)
/// - `TIMEOUT_STATUS_SOURCE`: `store` or `embedded` (default `store`)
/// - `SCAN_INTERVAL_SECS`, `SCAN_LOOKBACK_HOURS`, `SCAN_SHARD_COUNT`,
///   `SCAN_STALE_AFTER_SECS`, `SCAN_ORDER_TIMEOUT_MS`: reconciliation scanner
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub machine_id: u16,
    pub pay_timeout: Duration,
    pub rpc_timeout: Duration,
    pub broker_timeout: Duration,
    pub max_reconsume_times: u32,
    pub broker_retain_messages: usize,
    pub status_source: StatusSource,
    pub scan_interval: Duration,
    pub scan_lookback: Duration,
    pub scan_shard_count: usize,
    pub scan_stale_after: Duration,
    pub scan_order_timeout: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            machine_id: env_or("MACHINE_ID", defaults.machine_id),
            pay_timeout: Duration::from_secs(env_or("PAY_TIMEOUT_SECS", 30)),
            rpc_timeout: Duration::from_millis(env_or("RPC_TIMEOUT_MS", 3000)),
            broker_timeout: Duration::from_millis(env_or("BROKER_TIMEOUT_MS", 3000)),
            max_reconsume_times: env_or("MAX_RECONSUME_TIMES", defaults.max_reconsume_times),
            broker_retain_messages: env_or(
                "BROKER_RETAIN_MESSAGES",
                defaults.broker_retain_messages,
            ),
            status_source: env_or("TIMEOUT_STATUS_SOURCE", defaults.status_source),
            scan_interval: Duration::from_secs(env_or("SCAN_INTERVAL_SECS", 300)),
            scan_lookback: Duration::from_secs(env_or::<u64>("SCAN_LOOKBACK_HOURS", 168) * 3600),
            scan_shard_count: env_or("SCAN_SHARD_COUNT", defaults.scan_shard_count),
            scan_stale_after: Duration::from_secs(env_or("SCAN_STALE_AFTER_SECS", 1800)),
            scan_order_timeout: Duration::from_millis(env_or("SCAN_ORDER_TIMEOUT_MS", 10_000)),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Deadlines shared by every component. Store calls use the RPC deadline.
    pub fn deadlines(&self) -> Deadlines {
        Deadlines {
            rpc: self.rpc_timeout,
            store: self.rpc_timeout,
            broker: self.broker_timeout,
        }
    }

    pub fn broker(&self) -> InMemoryBrokerConfig {
        InMemoryBrokerConfig {
            retain_messages: self.broker_retain_messages,
            ..InMemoryBrokerConfig::default()
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            topics: Topics::default(),
            deadlines: self.deadlines(),
            pay_timeout_delay: self.pay_timeout,
        }
    }

    pub fn compensator(&self) -> CompensatorConfig {
        CompensatorConfig {
            topics: Topics::default(),
            deadlines: self.deadlines(),
            max_reconsume_times: self.max_reconsume_times,
            status_source: self.status_source,
        }
    }

    pub fn scanner(&self) -> ScannerConfig {
        ScannerConfig {
            deadlines: self.deadlines(),
            interval: self.scan_interval,
            lookback: self.scan_lookback,
            shard_count: self.scan_shard_count,
            stale_after: self.scan_stale_after,
            order_timeout: self.scan_order_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        let compensator = CompensatorConfig::default();
        let scanner = ScannerConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            machine_id: 1,
            pay_timeout: coordinator.pay_timeout_delay,
            rpc_timeout: coordinator.deadlines.rpc,
            broker_timeout: coordinator.deadlines.broker,
            max_reconsume_times: compensator.max_reconsume_times,
            broker_retain_messages: InMemoryBrokerConfig::default().retain_messages,
            status_source: compensator.status_source,
            scan_interval: scanner.interval,
            scan_lookback: scanner.lookback,
            scan_shard_count: scanner.shard_count,
            scan_stale_after: scanner.stale_after,
            scan_order_timeout: scanner.order_timeout,
        }
    }
}
