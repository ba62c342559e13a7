//! Tunables for the coordinator, compensator and scanner.
//!
//! Every struct has a `Default` matching production settings; only the
//! binary reads the environment.

use std::time::Duration;

/// Topic names used by the order transaction flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Half-message topic for the create-order transaction.
    pub create_order: String,
    /// Delayed payment-timeout topic.
    pub pay_timeout: String,
    /// Success notice for downstream audit.
    pub order_created: String,
    /// Stock compensation requests.
    pub stock_rollback: String,
    /// Application-level dead letters for the timeout consumer.
    pub dead_letter: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            create_order: "create_order".to_string(),
            pay_timeout: "pay_timeout".to_string(),
            order_created: "order_created_successfully".to_string(),
            stock_rollback: "stock_rollback_needed".to_string(),
            dead_letter: "dead_letter_queue".to_string(),
        }
    }
}

/// Per-operation deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Goods and stock RPCs.
    pub rpc: Duration,
    /// Order store calls.
    pub store: Duration,
    /// Broker sends.
    pub broker: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            rpc: Duration::from_secs(3),
            store: Duration::from_secs(3),
            broker: Duration::from_secs(3),
        }
    }
}

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub topics: Topics,
    pub deadlines: Deadlines,
    /// How long an order may stay unpaid before the timeout message fires.
    pub pay_timeout_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            deadlines: Deadlines::default(),
            pay_timeout_delay: Duration::from_secs(30),
        }
    }
}

/// Where the compensator reads the order status from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusSource {
    /// Re-read the order from the store (authoritative).
    #[default]
    Store,
    /// Trust the status snapshot carried in the message.
    Embedded,
}

impl std::str::FromStr for StatusSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" => Ok(StatusSource::Store),
            "embedded" => Ok(StatusSource::Embedded),
            other => Err(format!("unknown status source: {other}")),
        }
    }
}

/// Timeout compensator settings.
#[derive(Debug, Clone)]
pub struct CompensatorConfig {
    pub topics: Topics,
    pub deadlines: Deadlines,
    /// Redelivery count at which a failing message is dead-lettered.
    pub max_reconsume_times: u32,
    pub status_source: StatusSource,
}

impl Default for CompensatorConfig {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            deadlines: Deadlines::default(),
            max_reconsume_times: 3,
            status_source: StatusSource::default(),
        }
    }
}

/// Reconciliation scanner settings.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub deadlines: Deadlines,
    /// Time between scan cycles.
    pub interval: Duration,
    /// How far back the lower identifier bound is looked up.
    pub lookback: Duration,
    pub shard_count: usize,
    /// Unpaid orders older than this are compensated.
    pub stale_after: Duration,
    /// Bound on waiting for a single order's compensation.
    pub order_timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            deadlines: Deadlines::default(),
            interval: Duration::from_secs(5 * 60),
            lookback: Duration::from_secs(7 * 24 * 60 * 60),
            shard_count: 10,
            stale_after: Duration::from_secs(30 * 60),
            order_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let topics = Topics::default();
        assert_eq!(topics.pay_timeout, "pay_timeout");
        assert_eq!(topics.dead_letter, "dead_letter_queue");

        let coordinator = CoordinatorConfig::default();
        assert_eq!(coordinator.pay_timeout_delay, Duration::from_secs(30));
        assert_eq!(coordinator.deadlines.rpc, Duration::from_secs(3));

        let compensator = CompensatorConfig::default();
        assert_eq!(compensator.max_reconsume_times, 3);
        assert_eq!(compensator.status_source, StatusSource::Store);

        let scanner = ScannerConfig::default();
        assert_eq!(scanner.interval, Duration::from_secs(300));
        assert_eq!(scanner.shard_count, 10);
        assert_eq!(scanner.stale_after, Duration::from_secs(1800));
    }

    #[test]
    fn test_status_source_parse() {
        assert_eq!("store".parse::<StatusSource>(), Ok(StatusSource::Store));
        assert_eq!("Embedded".parse::<StatusSource>(), Ok(StatusSource::Embedded));
        assert!("cache".parse::<StatusSource>().is_err());
    }
}
