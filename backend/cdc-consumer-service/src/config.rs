use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CdcError, Result};

pub const DEFAULT_GROUP_ID: &str = "cdc-consumer-group";
pub const DEFAULT_CUSTOMER_TOPIC: &str = "mariadb01.appdb.customers";
pub const DEFAULT_ORDER_TOPIC: &str = "mariadb01.appdb.orders";

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for `/`, `/health` and `/metrics`
    pub http_port: u16,
    /// `None` when `KAFKA_BROKERS` is unset or empty
    pub kafka: Option<KafkaConfig>,
    pub topics: TopicConfig,
    pub health_probe_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka brokers (comma-separated)
    pub brokers: String,
    /// Consumer group shared by every topic stream
    pub group_id: String,
    pub auto_offset_reset: OffsetReset,
    pub session_timeout_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub customers: String,
    pub orders: String,
}

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(CdcError::config(format!(
                "KAFKA_AUTO_OFFSET_RESET must be 'earliest' or 'latest', got '{}'",
                other
            ))),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup (environment, test map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let http_port = parse_var::<u16>("HTTP_PORT", &var("HTTP_PORT", "8080"))?;
        let probe_timeout_ms =
            parse_var::<u64>("HEALTH_PROBE_TIMEOUT_MS", &var("HEALTH_PROBE_TIMEOUT_MS", "3000"))?;

        let topics = TopicConfig {
            customers: var("CDC_CUSTOMER_TOPIC", DEFAULT_CUSTOMER_TOPIC),
            orders: var("CDC_ORDER_TOPIC", DEFAULT_ORDER_TOPIC),
        };
        if topics.customers == topics.orders {
            return Err(CdcError::config(format!(
                "CDC_CUSTOMER_TOPIC and CDC_ORDER_TOPIC must differ (both '{}')",
                topics.customers
            )));
        }

        let kafka = match lookup("KAFKA_BROKERS")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            None => None,
            Some(brokers) => Some(KafkaConfig {
                brokers,
                group_id: var("CDC_CONSUMER_GROUP", DEFAULT_GROUP_ID),
                auto_offset_reset: var("KAFKA_AUTO_OFFSET_RESET", "earliest").parse()?,
                session_timeout_ms: parse_var::<u32>(
                    "KAFKA_SESSION_TIMEOUT_MS",
                    &var("KAFKA_SESSION_TIMEOUT_MS", "30000"),
                )?,
            }),
        };

        Ok(Self {
            http_port,
            kafka,
            topics,
            health_probe_timeout: Duration::from_millis(probe_timeout_ms),
        })
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| CdcError::config(format!("{} has invalid value '{}': {}", key, raw, e)))
}
