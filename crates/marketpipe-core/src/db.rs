//! Postgres access for verification and cleanup.
//!
//! The pipeline never writes rows itself; the JDBC sink does. This module
//! only inspects the destination tables (existence, row counts) and, when
//! configured, truncates them between runs.

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use marketpipe_types::RecordType;

use crate::config::AppConfig;

/// Tables that must exist before the pipeline runs. Index data is optional
/// in older deployments, so it is not part of the critical set.
const CRITICAL_TABLES: [&str; 3] = ["ticker_data", "trade_data", "ack_data"];

pub struct Database {
    client: Client,
    driver: JoinHandle<()>,
}

impl Database {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let conn_string = config.db_conn_string();
        let (client, connection) = tokio_postgres::connect(&conn_string, NoTls)
            .await
            .with_context(|| format!("Failed to connect to postgres at {}", config.db_host()))?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection task failed");
            }
        });
        Ok(Self { client, driver })
    }

    /// Names of all ordinary tables in the public schema.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[],
            )
            .await
            .context("Failed to list tables")?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    /// True when every critical destination table exists. The caller decides
    /// whether a missing optional table matters.
    pub async fn schema_initialized(&self) -> Result<bool> {
        let tables = self.list_tables().await?;
        let missing: Vec<&str> = CRITICAL_TABLES
            .iter()
            .filter(|t| !tables.iter().any(|have| have.as_str() == **t))
            .copied()
            .collect();
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "Critical tables are missing");
        }
        Ok(missing.is_empty())
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_name = $1)",
                &[&table],
            )
            .await
            .with_context(|| format!("Failed to check table '{table}'"))?;
        Ok(row.get(0))
    }

    /// Row count of one record type's destination table.
    pub async fn table_count(&self, record_type: RecordType) -> Result<i64> {
        let table = record_type.table_name();
        // Table names come from RecordType, never from input.
        let query = format!("SELECT COUNT(*) FROM {table}");
        let row = self
            .client
            .query_one(&query, &[])
            .await
            .with_context(|| format!("Failed to count rows in '{table}'"))?;
        Ok(row.get(0))
    }

    /// Truncate the destination tables of the given types. Only called when
    /// `clear_tables` is set; missing tables are skipped with a warning.
    pub async fn truncate_tables(&self, record_types: &[RecordType]) -> Result<()> {
        for record_type in record_types {
            let table = record_type.table_name();
            if !self.table_exists(table).await? {
                tracing::warn!(table, "Skipping truncate of missing table");
                continue;
            }
            let query = format!("TRUNCATE TABLE {table}");
            self.client
                .execute(&query, &[])
                .await
                .with_context(|| format!("Failed to truncate '{table}'"))?;
            tracing::info!(table, "Truncated table");
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
