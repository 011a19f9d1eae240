//! Broker connectivity reporting for the `/health` endpoint.
//!
//! Connectivity problems are only ever surfaced here. They never stop the
//! consumption streams, which keep retrying on their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CdcError, Result};

/// Extra time granted on top of the probe's own timeout before the reporter
/// gives up on it.
const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Lightweight check that the broker is reachable.
#[async_trait]
pub trait BrokerProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// Probe that fetches metadata for one known topic.
pub struct KafkaMetadataProbe {
    brokers: String,
    topic: String,
    timeout: Duration,
}

impl KafkaMetadataProbe {
    pub fn new(brokers: impl Into<String>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            timeout,
        }
    }
}

#[async_trait]
impl BrokerProbe for KafkaMetadataProbe {
    async fn probe(&self) -> Result<()> {
        let brokers = self.brokers.clone();
        let topic = self.topic.clone();
        let timeout = self.timeout;

        // librdkafka metadata calls block the calling thread
        let result = tokio::task::spawn_blocking(move || {
            let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("request.timeout.ms", timeout.as_millis().to_string())
                .create()
                .map_err(|e| format!("Failed to create Kafka admin client: {}", e))?;

            let metadata = admin
                .inner()
                .fetch_metadata(Some(topic.as_str()), timeout)
                .map_err(|e| format!("Failed to fetch Kafka metadata: {}", e))?;

            if metadata.brokers().is_empty() {
                return Err("No Kafka brokers available".to_string());
            }

            if let Some(err) = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .and_then(|t| t.error())
            {
                return Err(format!("Topic '{}' unavailable: {:?}", topic, err));
            }

            Ok(())
        })
        .await
        .map_err(|e| CdcError::connectivity(format!("Failed to join probe task: {}", e)))?;

        result.map_err(CdcError::connectivity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DEGRADED")]
    Degraded,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("UP"),
            Self::Degraded => f.write_str("DEGRADED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerStatus {
    Connected,
    /// Probe failed or timed out; carries the reason.
    Disconnected(String),
    NotConfigured,
}

impl fmt::Display for BrokerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("Connected"),
            Self::Disconnected(reason) => write!(f, "Disconnected: {}", reason),
            Self::NotConfigured => f.write_str("Not configured"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub broker: BrokerStatus,
    pub checked_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct HealthReporter {
    probe: Option<Arc<dyn BrokerProbe>>,
    timeout: Duration,
}

impl HealthReporter {
    pub fn new(probe: Arc<dyn BrokerProbe>, timeout: Duration) -> Self {
        Self {
            probe: Some(probe),
            timeout,
        }
    }

    /// Reporter for a process started without broker configuration.
    pub fn not_configured() -> Self {
        Self {
            probe: None,
            timeout: Duration::ZERO,
        }
    }

    /// Probe the broker once. Always resolves within the configured bound.
    pub async fn report(&self) -> HealthReport {
        let broker = match &self.probe {
            None => BrokerStatus::NotConfigured,
            Some(probe) => match tokio::time::timeout(self.timeout + PROBE_GRACE, probe.probe()).await
            {
                Ok(Ok(())) => BrokerStatus::Connected,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Kafka health probe failed");
                    let reason = match e {
                        CdcError::Connectivity(msg) => msg,
                        other => other.to_string(),
                    };
                    BrokerStatus::Disconnected(reason)
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Kafka health probe timed out"
                    );
                    BrokerStatus::Disconnected(format!(
                        "probe timed out after {}ms",
                        (self.timeout + PROBE_GRACE).as_millis()
                    ))
                }
            },
        };

        let status = match broker {
            BrokerStatus::Disconnected(_) => HealthStatus::Degraded,
            BrokerStatus::Connected | BrokerStatus::NotConfigured => HealthStatus::Up,
        };

        HealthReport {
            status,
            broker,
            checked_at: Utc::now(),
        }
    }
}
