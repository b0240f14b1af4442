//! Application configuration, loaded from a TOML file.
//!
//! Every endpoint has an internal (container network) and external (host)
//! variant; `pipeline.running_in_container` selects between them globally.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use marketpipe_types::RecordType;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub kafka: KafkaSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub health: HealthSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default)]
    pub running_in_container: bool,
    #[serde(default = "default_enabled_types")]
    pub enabled_types: Vec<String>,
    #[serde(default)]
    pub use_schema_files: bool,
    #[serde(default = "default_schema_dir")]
    pub schema_dir: String,
    #[serde(default)]
    pub clear_tables: bool,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: f64,
    #[serde(default)]
    pub dead_letter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSection {
    #[serde(default = "default_bootstrap_internal")]
    pub bootstrap_servers_internal: String,
    #[serde(default = "default_bootstrap")]
    pub bootstrap_servers: String,
    #[serde(default = "default_registry_internal")]
    pub schema_registry_url_internal: String,
    #[serde(default = "default_registry")]
    pub schema_registry_url: String,
    #[serde(default = "default_connect_internal")]
    pub connect_url_internal: String,
    #[serde(default = "default_connect")]
    pub connect_url: String,
    #[serde(default = "default_partitions")]
    pub topic_partitions: i32,
    #[serde(default = "default_replicas")]
    pub topic_replicas: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsSection {
    #[serde(default = "default_ticker_topic")]
    pub ticker: String,
    #[serde(default = "default_trade_topic")]
    pub trade: String,
    #[serde(default = "default_ack_topic")]
    pub ack: String,
    #[serde(default = "default_index_topic")]
    pub index: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_host_internal")]
    pub host_internal: String,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_user")]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}
fn default_enabled_types() -> Vec<String> {
    vec![
        "ticker".to_string(),
        "trade".to_string(),
        "ack".to_string(),
        "index".to_string(),
    ]
}
fn default_schema_dir() -> String {
    "schemas".to_string()
}
fn default_update_interval() -> f64 {
    1.0
}
fn default_bootstrap_internal() -> String {
    "broker0:29092,broker1:29093,broker2:29094".to_string()
}
fn default_bootstrap() -> String {
    "localhost:9092".to_string()
}
fn default_registry_internal() -> String {
    "http://schema-registry:8081".to_string()
}
fn default_registry() -> String {
    "http://localhost:8081".to_string()
}
fn default_connect_internal() -> String {
    "http://kafka-connect:8083".to_string()
}
fn default_connect() -> String {
    "http://localhost:8083".to_string()
}
fn default_partitions() -> i32 {
    3
}
fn default_replicas() -> i32 {
    2
}
fn default_ticker_topic() -> String {
    "marketpipe.ticker.avro".to_string()
}
fn default_trade_topic() -> String {
    "marketpipe.trade.avro".to_string()
}
fn default_ack_topic() -> String {
    "marketpipe.ack.avro".to_string()
}
fn default_index_topic() -> String {
    "marketpipe.index.avro".to_string()
}
fn default_db_host_internal() -> String {
    "timescaledb".to_string()
}
fn default_db_host() -> String {
    "localhost".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_name() -> String {
    "marketpipe".to_string()
}
fn default_db_user() -> String {
    "postgres".to_string()
}
fn default_health_port() -> u16 {
    8000
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            running_in_container: false,
            enabled_types: default_enabled_types(),
            use_schema_files: false,
            schema_dir: default_schema_dir(),
            clear_tables: false,
            run_migrations: true,
            update_interval_secs: default_update_interval(),
            dead_letter: false,
        }
    }
}

impl Default for KafkaSection {
    fn default() -> Self {
        Self {
            bootstrap_servers_internal: default_bootstrap_internal(),
            bootstrap_servers: default_bootstrap(),
            schema_registry_url_internal: default_registry_internal(),
            schema_registry_url: default_registry(),
            connect_url_internal: default_connect_internal(),
            connect_url: default_connect(),
            topic_partitions: default_partitions(),
            topic_replicas: default_replicas(),
        }
    }
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            ticker: default_ticker_topic(),
            trade: default_trade_topic(),
            ack: default_ack_topic(),
            index: default_index_topic(),
        }
    }
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            host_internal: default_db_host_internal(),
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: default_db_user(),
        }
    }
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            port: default_health_port(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    fn internal(&self) -> bool {
        self.pipeline.running_in_container
    }

    pub fn bootstrap_servers(&self) -> &str {
        if self.internal() {
            &self.kafka.bootstrap_servers_internal
        } else {
            &self.kafka.bootstrap_servers
        }
    }

    pub fn schema_registry_url(&self) -> &str {
        if self.internal() {
            &self.kafka.schema_registry_url_internal
        } else {
            &self.kafka.schema_registry_url
        }
    }

    pub fn connect_url(&self) -> &str {
        if self.internal() {
            &self.kafka.connect_url_internal
        } else {
            &self.kafka.connect_url
        }
    }

    pub fn db_host(&self) -> &str {
        if self.internal() {
            &self.database.host_internal
        } else {
            &self.database.host
        }
    }

    /// Connection string for tokio-postgres.
    pub fn db_conn_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.db_host(),
            self.database.port,
            self.database.user,
            self.database.password,
            self.database.name,
        )
    }

    pub fn topic_for(&self, record_type: RecordType) -> &str {
        match record_type {
            RecordType::Ticker => &self.topics.ticker,
            RecordType::Trade => &self.topics.trade,
            RecordType::Ack => &self.topics.ack,
            RecordType::Index => &self.topics.index,
        }
    }

    /// Enabled record types, skipping unrecognized names with a warning.
    pub fn enabled_record_types(&self) -> Vec<RecordType> {
        self.pipeline
            .enabled_types
            .iter()
            .filter_map(|s| {
                let rt = RecordType::parse(s);
                if rt.is_none() {
                    tracing::warn!(record_type = %s, "Ignoring unknown enabled record type");
                }
                rt
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(!config.pipeline.running_in_container);
        assert_eq!(config.pipeline.enabled_types.len(), 4);
        assert_eq!(config.kafka.topic_partitions, 3);
        assert_eq!(config.kafka.topic_replicas, 2);
        assert_eq!(config.bootstrap_servers(), "localhost:9092");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.health.port, 8000);
        assert!((config.pipeline.update_interval_secs - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_full_config() {
        let raw = r#"
[pipeline]
running_in_container = true
enabled_types = ["ticker", "ack"]
use_schema_files = true
clear_tables = true
update_interval_secs = 0.5

[kafka]
bootstrap_servers = "kafka.test:9092"
topic_partitions = 1
topic_replicas = 1

[topics]
ticker = "test.ticker.avro"

[database]
host = "db.test"
name = "testdb"
"#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        // internal variants win while running in the container network
        assert_eq!(
            config.bootstrap_servers(),
            "broker0:29092,broker1:29093,broker2:29094"
        );
        assert_eq!(config.connect_url(), "http://kafka-connect:8083");
        assert_eq!(config.db_host(), "timescaledb");
        assert_eq!(
            config.enabled_record_types(),
            vec![RecordType::Ticker, RecordType::Ack]
        );
        assert_eq!(config.topic_for(RecordType::Ticker), "test.ticker.avro");
        assert!(config.pipeline.clear_tables);
    }

    #[test]
    fn external_endpoints_outside_container() {
        let raw = r#"
[kafka]
bootstrap_servers = "kafka.test:9092"
connect_url = "http://connect.test:8083"

[database]
host = "db.test"
"#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.bootstrap_servers(), "kafka.test:9092");
        assert_eq!(config.connect_url(), "http://connect.test:8083");
        assert_eq!(config.db_host(), "db.test");
        assert!(config.db_conn_string().contains("host=db.test"));
    }

    #[test]
    fn unknown_enabled_type_is_skipped() {
        let raw = r#"
[pipeline]
enabled_types = ["ticker", "order_book"]
"#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.enabled_record_types(), vec![RecordType::Ticker]);
    }
}
