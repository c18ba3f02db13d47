//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::{ConsumerConfig, IntakeConfig, RelayConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: bind address (default: `"0.0.0.0"` / `50051`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory store is used when unset
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `INVENTORY_URL`: catalog service base URL (default: `"http://localhost:8081"`)
/// - `INVENTORY_TIMEOUT_MS`: per-call deadline (default: `3000`)
/// - `KAFKA_BROKERS`: broker list; the in-memory bus is used when unset
/// - `CONSUMER_GROUP`: stock event consumer group (default: `"order-service-group"`)
/// - `CONSUMER_RETRY_DELAY_MS`: pause after a broker error (default: `1000`)
/// - `OUTBOX_POLL_INTERVAL_MS`: outbox relay interval (default: `2000`)
/// - `STOCK_CHECK_CONCURRENCY`: parallel stock checks per order (default: `8`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub inventory_url: String,
    pub inventory_timeout: Duration,
    pub kafka_brokers: Option<String>,
    pub consumer_group: String,
    pub consumer_retry_delay: Duration,
    pub outbox_poll_interval: Duration,
    pub stock_check_concurrency: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparsable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|value| value.parse().ok())
                .unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| -> Duration {
            Duration::from_millis(number(key, default.as_millis() as u64))
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            inventory_url: lookup("INVENTORY_URL").unwrap_or(defaults.inventory_url),
            inventory_timeout: millis("INVENTORY_TIMEOUT_MS", defaults.inventory_timeout),
            kafka_brokers: lookup("KAFKA_BROKERS").filter(|brokers| !brokers.is_empty()),
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            consumer_retry_delay: millis("CONSUMER_RETRY_DELAY_MS", defaults.consumer_retry_delay),
            outbox_poll_interval: millis("OUTBOX_POLL_INTERVAL_MS", defaults.outbox_poll_interval),
            stock_check_concurrency: number(
                "STOCK_CHECK_CONCURRENCY",
                defaults.stock_check_concurrency as u64,
            ) as usize,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig {
            stock_check_concurrency: self.stock_check_concurrency,
            inventory_timeout: self.inventory_timeout,
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            group: self.consumer_group.clone(),
            retry_delay: self.consumer_retry_delay,
            ..ConsumerConfig::default()
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            interval: self.outbox_poll_interval,
            ..RelayConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 5,
            inventory_url: "http://localhost:8081".to_string(),
            inventory_timeout: Duration::from_millis(3000),
            kafka_brokers: None,
            consumer_group: "order-service-group".to_string(),
            consumer_retry_delay: Duration::from_millis(1000),
            outbox_poll_interval: Duration::from_millis(2000),
            stock_check_concurrency: 8,
        }
    }
}
