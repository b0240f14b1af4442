//! Kafka Connect provisioning.
//!
//! One JDBC sink connector per record type bridges a topic into its Postgres
//! table. Connector names derive from the record type, so re-provisioning is
//! idempotent: `create(force)` deletes any stale connector of the same name
//! before posting the declarative config.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value as JsonValue};

use marketpipe_types::RecordType;

use crate::config::AppConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const RUNNING_TIMEOUT: Duration = Duration::from_secs(30);

/// Host Kafka Connect uses to reach Postgres. Connect always runs inside the
/// compose network, so outside the container it must go through the Docker
/// bridge rather than localhost.
fn db_host_for_connect(config: &AppConfig) -> &str {
    if config.pipeline.running_in_container {
        &config.database.host_internal
    } else {
        "172.17.0.1"
    }
}

pub struct SinkConnector {
    client: reqwest::Client,
    connect_url: String,
    name: String,
    topic: String,
    table: String,
    primary_keys: Vec<String>,
    jdbc_url: String,
    db_user: String,
    db_password: String,
    registry_url: String,
}

impl SinkConnector {
    /// Build the connector for a record type. All shipped record types use
    /// the synthetic `id` primary key that the sink tables generate.
    pub fn new(config: &AppConfig, record_type: RecordType) -> Self {
        Self::with_primary_keys(config, record_type, vec!["id".to_string()])
    }

    pub fn with_primary_keys(
        config: &AppConfig,
        record_type: RecordType,
        primary_keys: Vec<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            connect_url: config.connect_url().to_string(),
            name: format!("postgres-sink-{}", record_type.as_str()),
            topic: config.topic_for(record_type).to_string(),
            table: record_type.table_name().to_string(),
            primary_keys,
            jdbc_url: format!(
                "jdbc:postgresql://{}:{}/{}",
                db_host_for_connect(config),
                config.database.port,
                config.database.name,
            ),
            db_user: config.database.user.clone(),
            db_password: config.database.password.clone(),
            // Connect runs inside the compose network, so it always needs
            // the internal registry endpoint.
            registry_url: config.kafka.schema_registry_url_internal.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declarative JDBC sink configuration. A single synthetic-id primary
    /// key means the table generates identity, so plain inserts; composite
    /// keys come from the record value and switch the sink to upsert.
    pub fn connector_config(&self) -> JsonValue {
        let synthetic_id = self.primary_keys == ["id"];
        let mut config = json!({
            "connector.class": "io.confluent.connect.jdbc.JdbcSinkConnector",
            "tasks.max": "1",
            "topics": self.topic,
            "connection.url": self.jdbc_url,
            "connection.user": self.db_user,
            "connection.password": self.db_password,
            "connection.attempts": "10",
            "connection.backoff.ms": "5000",
            "table.name.format": format!("public.{}", self.table),
            "auto.create": "false",
            "auto.evolve": "false",
            "insert.mode": if synthetic_id { "insert" } else { "upsert" },
            "dialect.name": "PostgreSqlDatabaseDialect",
            "errors.tolerance": "all",
            "errors.log.enable": "true",
            "errors.log.include.messages": "true",
            "batch.size": "100",
            "key.converter": "org.apache.kafka.connect.storage.StringConverter",
            "value.converter": "io.confluent.connect.avro.AvroConverter",
            "value.converter.schema.registry.url": self.registry_url,
        });
        if !synthetic_id {
            config["pk.mode"] = json!("record_value");
            config["pk.fields"] = json!(self.primary_keys.join(","));
            config["delete.enabled"] = json!("false");
        }
        config
    }

    pub async fn exists(&self) -> bool {
        let url = format!("{}/connectors/{}", self.connect_url, self.name);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Delete the connector. Absence (404) counts as success.
    pub async fn delete(&self) -> Result<()> {
        let url = format!("{}/connectors/{}", self.connect_url, self.name);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("Failed to delete connector '{}'", self.name))?;
        match response.status().as_u16() {
            204 => {
                tracing::info!(connector = %self.name, "Deleted connector");
                Ok(())
            }
            404 => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Delete of connector '{}' failed ({status}): {body}", self.name)
            }
        }
    }

    /// Provision the connector, waiting first for the Connect endpoint to
    /// come up. With `force`, a pre-existing connector of the same name is
    /// dropped and re-created.
    pub async fn create(&self, force: bool) -> Result<()> {
        if !wait_for_connect_ready(&self.client, &self.connect_url).await {
            anyhow::bail!("Kafka Connect at {} never became ready", self.connect_url);
        }

        if force && self.exists().await {
            self.delete().await?;
        }

        let body = json!({
            "name": self.name,
            "config": self.connector_config(),
        });
        let url = format!("{}/connectors", self.connect_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to create connector '{}'", self.name))?;

        if response.status().is_success() {
            tracing::info!(connector = %self.name, topic = %self.topic, table = %self.table, "Created connector");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Create of connector '{}' failed ({status}): {body}", self.name)
        }
    }

    /// Poll until the connector and every task report RUNNING. Returns false
    /// on timeout; callers treat a non-running connector as advisory, not
    /// fatal.
    pub async fn wait_until_running(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Some(status) = self.status().await {
                let state = status["connector"]["state"].as_str().unwrap_or("");
                if state == "RUNNING" {
                    let tasks = status["tasks"].as_array().cloned().unwrap_or_default();
                    if tasks.iter().all(|t| t["state"] == "RUNNING") {
                        tracing::info!(connector = %self.name, "Connector and all tasks are running");
                        return true;
                    }
                    tracing::debug!(connector = %self.name, "Connector running, tasks still starting");
                } else {
                    tracing::debug!(connector = %self.name, state, "Connector not running yet");
                }
            }
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
        tracing::warn!(connector = %self.name, "Timed out waiting for connector to reach RUNNING");
        false
    }

    async fn status(&self) -> Option<JsonValue> {
        let url = format!("{}/connectors/{}/status", self.connect_url, self.name);
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }
}

/// Poll `GET /connectors` until the endpoint answers. Same bounded-retry
/// shape as the readiness probes.
pub async fn wait_for_connect_ready(client: &reqwest::Client, connect_url: &str) -> bool {
    const MAX_RETRIES: u32 = 30;
    const RETRY_INTERVAL: Duration = Duration::from_secs(5);

    let url = format!("{connect_url}/connectors");
    for attempt in 1..=MAX_RETRIES {
        if let Ok(response) = client.get(&url).send().await {
            if response.status().is_success() {
                return true;
            }
        }
        tracing::info!(attempt, max = MAX_RETRIES, "Kafka Connect not ready yet");
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
    tracing::error!(url = %connect_url, "Kafka Connect unavailable after maximum retries");
    false
}

/// Remove every connector currently registered, regardless of origin. Used
/// by the infrastructure phase to clear stale state from earlier runs.
pub async fn delete_all_connectors(config: &AppConfig) -> Result<()> {
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let connect_url = config.connect_url();

    let names: Vec<String> = client
        .get(format!("{connect_url}/connectors"))
        .send()
        .await
        .context("Failed to list connectors")?
        .json()
        .await
        .context("Failed to parse connector list")?;
    tracing::info!(count = names.len(), "Removing existing connectors");

    for name in names {
        let response = client
            .delete(format!("{connect_url}/connectors/{name}"))
            .send()
            .await
            .with_context(|| format!("Failed to delete connector '{name}'"))?;
        match response.status().as_u16() {
            200 | 204 | 404 => tracing::info!(connector = %name, "Deleted connector"),
            status => tracing::error!(connector = %name, status, "Failed to delete connector"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_names_are_deterministic_per_type() {
        let config = AppConfig::default();
        assert_eq!(SinkConnector::new(&config, RecordType::Ticker).name(), "postgres-sink-ticker");
        assert_eq!(SinkConnector::new(&config, RecordType::Ack).name(), "postgres-sink-ack");
    }

    #[test]
    fn synthetic_id_uses_insert_mode_without_pk_fields() {
        let config = AppConfig::default();
        let connector = SinkConnector::new(&config, RecordType::Trade);
        let body = connector.connector_config();
        assert_eq!(body["insert.mode"], "insert");
        assert_eq!(body["topics"], "marketpipe.trade.avro");
        assert_eq!(body["table.name.format"], "public.trade_data");
        assert!(body.get("pk.mode").is_none());
    }

    #[test]
    fn composite_keys_switch_to_upsert() {
        let config = AppConfig::default();
        let connector = SinkConnector::with_primary_keys(
            &config,
            RecordType::Index,
            vec!["index_name".to_string(), "timestamp".to_string()],
        );
        let body = connector.connector_config();
        assert_eq!(body["insert.mode"], "upsert");
        assert_eq!(body["pk.mode"], "record_value");
        assert_eq!(body["pk.fields"], "index_name,timestamp");
    }

    #[test]
    fn jdbc_url_uses_docker_bridge_outside_container() {
        let mut config = AppConfig::default();
        config.pipeline.running_in_container = false;
        let connector = SinkConnector::new(&config, RecordType::Ticker);
        let body = connector.connector_config();
        assert_eq!(body["connection.url"], "jdbc:postgresql://172.17.0.1:5432/marketpipe");

        config.pipeline.running_in_container = true;
        let connector = SinkConnector::new(&config, RecordType::Ticker);
        let body = connector.connector_config();
        assert_eq!(body["connection.url"], "jdbc:postgresql://timescaledb:5432/marketpipe");
    }
}
