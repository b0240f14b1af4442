//! Readiness probes for external dependencies.
//!
//! Each dependency answers a boolean `is_ready`; [`wait_for`] polls with a
//! fixed delay and reports exhaustion as `false` rather than an error, so the
//! orchestrator can treat an absent dependency as a phase failure instead of
//! a transient exception.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use tokio_postgres::NoTls;

use crate::config::AppConfig;

pub const DEFAULT_RETRIES: u32 = 30;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn is_ready(&self) -> bool;
}

/// Poll a probe until it reports ready or the retries run out.
pub async fn wait_for(probe: &dyn ReadinessProbe, retries: u32, delay: Duration) -> bool {
    for attempt in 1..=retries {
        if probe.is_ready().await {
            tracing::info!(dependency = probe.name(), "Dependency is ready");
            return true;
        }
        tracing::info!(
            dependency = probe.name(),
            attempt,
            max = retries,
            "Dependency not ready yet"
        );
        tokio::time::sleep(delay).await;
    }
    tracing::error!(dependency = probe.name(), "Dependency never became ready");
    false
}

/// Kafka broker: ready when a metadata fetch succeeds.
pub struct BrokerProbe {
    bootstrap_servers: String,
}

impl BrokerProbe {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            bootstrap_servers: config.bootstrap_servers().to_string(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for BrokerProbe {
    fn name(&self) -> &str {
        "kafka-broker"
    }

    async fn is_ready(&self) -> bool {
        let servers = self.bootstrap_servers.clone();
        // Metadata fetch is blocking in librdkafka.
        let result = tokio::task::spawn_blocking(move || {
            let consumer: BaseConsumer = ClientConfig::new()
                .set("bootstrap.servers", &servers)
                .create()
                .ok()?;
            consumer.fetch_metadata(None, PROBE_TIMEOUT).ok()?;
            Some(())
        })
        .await;
        matches!(result, Ok(Some(())))
    }
}

/// Schema registry: ready when the subject listing answers.
pub struct SchemaRegistryProbe {
    url: String,
    client: reqwest::Client,
}

impl SchemaRegistryProbe {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            url: config.schema_registry_url().to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for SchemaRegistryProbe {
    fn name(&self) -> &str {
        "schema-registry"
    }

    async fn is_ready(&self) -> bool {
        let url = format!("{}/subjects", self.url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Postgres: ready when a connection opens and answers `SELECT 1`.
pub struct PostgresProbe {
    conn_string: String,
}

impl PostgresProbe {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            conn_string: config.db_conn_string(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for PostgresProbe {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn is_ready(&self) -> bool {
        let attempt = async {
            let (client, connection) = tokio_postgres::connect(&self.conn_string, NoTls).await?;
            let driver = tokio::spawn(connection);
            let result = client.query_one("SELECT 1", &[]).await;
            driver.abort();
            result.map(|_| ())
        };
        match tokio::time::timeout(PROBE_TIMEOUT, attempt).await {
            Ok(Ok(())) => true,
            _ => false,
        }
    }
}

/// The standard probe set, in the order the infrastructure phase checks them.
pub fn all_probes(config: &AppConfig) -> Vec<Box<dyn ReadinessProbe>> {
    vec![
        Box::new(BrokerProbe::new(config)),
        Box::new(SchemaRegistryProbe::new(config)),
        Box::new(PostgresProbe::new(config)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProbe {
        ready_after: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReadinessProbe for FlakyProbe {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn is_ready(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.ready_after
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_retries_until_ready() {
        let probe = FlakyProbe {
            ready_after: 3,
            calls: AtomicU32::new(0),
        };
        assert!(wait_for(&probe, 5, Duration::from_millis(10)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_gives_up_after_retries() {
        let probe = FlakyProbe {
            ready_after: 10,
            calls: AtomicU32::new(0),
        };
        assert!(!wait_for(&probe, 4, Duration::from_millis(10)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn probe_set_covers_broker_registry_and_store() {
        let config = AppConfig::default();
        let probes = all_probes(&config);
        let names: Vec<&str> = probes.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["kafka-broker", "schema-registry", "postgres"]);
    }
}
