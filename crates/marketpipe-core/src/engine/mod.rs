//! Pipeline orchestration.
//!
//! Seven strictly ordered phases carry the run from preflight checks through
//! data-flow verification and cleanup. Phases 1, 3, 4 and 6 are mandatory: a
//! failure there stops the run. Phases 2 and 5 are advisory and only warn.
//! Per-type work inside a phase fans out over a `JoinSet` and the phase waits
//! for every task before concluding; a failed sibling never cancels the rest.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;

use crate::config::AppConfig;
use crate::connect::{self, SinkConnector, RUNNING_TIMEOUT};
use crate::db::Database;
use crate::generate::{generator_for, RecordGenerator};
use crate::probe::{self, DEFAULT_DELAY, DEFAULT_RETRIES};
use crate::produce::DeliveryChannel;
use crate::schema::loader::SchemaStore;
use crate::topics::{topic_has_data, VERIFICATION_TIMEOUT};

const PRODUCE_DURATION: Duration = Duration::from_secs(3);
const SINK_SETTLE: Duration = Duration::from_secs(10);
const TERMINAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preflight,
    SchemaInit,
    Infrastructure,
    Producers,
    Connectors,
    Verification,
}

impl Phase {
    /// Advisory phases only warn on failure; the run continues and the
    /// verdict ignores them.
    pub fn advisory(&self) -> bool {
        matches!(self, Phase::SchemaInit | Phase::Connectors)
    }

    fn mandatory_set() -> [Phase; 4] {
        [
            Phase::Preflight,
            Phase::Infrastructure,
            Phase::Producers,
            Phase::Verification,
        ]
    }
}

/// Per-phase results of one run. The verdict requires every mandatory phase
/// to have run and passed; an aborted run leaves later phases unrecorded and
/// therefore fails.
#[derive(Debug, Default)]
pub struct RunReport {
    results: Vec<(Phase, bool)>,
}

impl RunReport {
    pub fn record(&mut self, phase: Phase, ok: bool) {
        self.results.push((phase, ok));
    }

    pub fn passed(&self, phase: Phase) -> Option<bool> {
        self.results.iter().find(|(p, _)| *p == phase).map(|(_, ok)| *ok)
    }

    pub fn verdict(&self) -> bool {
        Phase::mandatory_set()
            .iter()
            .all(|phase| self.passed(*phase) == Some(true))
    }
}

pub struct Orchestrator {
    config: AppConfig,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run the whole pipeline. Any error escaping a phase is caught here,
    /// logged, and surfaces as overall failure.
    pub async fn run(&self) -> bool {
        match self.run_phases().await {
            Ok(report) => {
                let ok = report.verdict();
                if ok {
                    tracing::info!("Pipeline run complete, all mandatory phases passed");
                } else {
                    tracing::error!("Pipeline run failed");
                }
                ok
            }
            Err(e) => {
                tracing::error!(error = %e, "Pipeline run aborted");
                false
            }
        }
    }

    async fn run_phases(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        tracing::info!("=== PREFLIGHT ===");
        let preflight = self.preflight().await?;
        report.record(Phase::Preflight, preflight);
        if !preflight {
            return Ok(report);
        }

        tracing::info!("=== SCHEMA INIT ===");
        let schema_init = self.schema_init().await;
        report.record(Phase::SchemaInit, schema_init);
        if !schema_init {
            tracing::warn!("Schema initialization check failed, continuing");
        }

        tracing::info!("=== INFRASTRUCTURE ===");
        let infrastructure = self.infrastructure().await;
        report.record(Phase::Infrastructure, infrastructure);
        if !infrastructure {
            return Ok(report);
        }

        tracing::info!("=== PRODUCERS ===");
        let producers = self.producers().await?;
        report.record(Phase::Producers, producers);
        if !producers {
            return Ok(report);
        }

        tracing::info!("=== CONNECTORS ===");
        let connectors = self.connectors().await;
        report.record(Phase::Connectors, connectors);
        if !connectors {
            tracing::warn!("Connector setup incomplete, continuing");
        }

        tracing::info!("=== VERIFICATION ===");
        let verification = self.verification().await?;
        report.record(Phase::Verification, verification);
        if !verification {
            return Ok(report);
        }

        tracing::info!("=== CLEANUP ===");
        self.cleanup().await?;

        Ok(report)
    }

    /// Phase 1: the destination tables of every enabled type must already
    /// exist. They are created by migrations, never here.
    async fn preflight(&self) -> Result<bool> {
        let db = Database::connect(&self.config).await?;
        let tables = db.list_tables().await?;
        let missing: Vec<&str> = self
            .config
            .enabled_record_types()
            .iter()
            .map(|rt| rt.table_name())
            .filter(|t| !tables.iter().any(|have| have.as_str() == *t))
            .collect();
        if missing.is_empty() {
            tracing::info!("All required tables exist");
            Ok(true)
        } else {
            tracing::error!(missing = ?missing, "Required tables are missing");
            Ok(false)
        }
    }

    /// Phase 2 (advisory): broader schema-initialization check.
    async fn schema_init(&self) -> bool {
        if self.config.pipeline.run_migrations {
            tracing::info!("Migrations are applied externally before startup");
        }
        match Database::connect(&self.config).await {
            Ok(db) => db.schema_initialized().await.unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "Schema initialization check failed");
                false
            }
        }
    }

    /// Phase 3: every external dependency must come up, stale connectors are
    /// wiped, and the schema registry must answer a subject listing.
    async fn infrastructure(&self) -> bool {
        for probe in probe::all_probes(&self.config) {
            if !probe::wait_for(probe.as_ref(), DEFAULT_RETRIES, DEFAULT_DELAY).await {
                tracing::error!(dependency = probe.name(), "Infrastructure dependency unavailable");
                return false;
            }
        }

        if let Err(e) = connect::delete_all_connectors(&self.config).await {
            tracing::error!(error = %e, "Failed to remove stale connectors");
            return false;
        }

        match self.list_registry_subjects().await {
            Ok(subjects) => {
                tracing::info!(count = subjects.len(), "Schema registry verified");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Schema registry verification failed");
                false
            }
        }
    }

    async fn list_registry_subjects(&self) -> Result<Vec<String>> {
        let url = format!("{}/subjects", self.config.schema_registry_url());
        let subjects = reqwest::Client::new()
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Schema registry request failed")?
            .error_for_status()
            .context("Schema registry returned an error")?
            .json()
            .await
            .context("Schema registry subject list was not valid JSON")?;
        Ok(subjects)
    }

    /// Phase 4: run one generator+channel pair per enabled type, then
    /// confirm every topic holds at least one message.
    async fn producers(&self) -> Result<bool> {
        self.run_producers(PRODUCE_DURATION).await?;

        for record_type in self.config.enabled_record_types() {
            let topic = self.config.topic_for(record_type);
            if !topic_has_data(&self.config, topic, VERIFICATION_TIMEOUT).await {
                tracing::error!(topic, "Topic has no data after producer run");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Spin up all enabled producers concurrently for a fixed duration.
    async fn run_producers(&self, duration: Duration) -> Result<()> {
        let store = SchemaStore::new(&self.config.pipeline.schema_dir);
        let interval = Duration::from_secs_f64(self.config.pipeline.update_interval_secs);

        let mut tasks = JoinSet::new();
        for record_type in self.config.enabled_record_types() {
            let schema = store.schema_for(record_type, self.config.pipeline.use_schema_files);
            let channel = DeliveryChannel::new(&self.config, record_type, schema)?;
            channel.initialize(&self.config).await?;
            let generator = generator_for(record_type);
            tasks.spawn(drive_producer(channel, generator, duration, interval));
        }

        // All-complete barrier: a panicked producer fails the phase, a
        // slower sibling is always awaited.
        while let Some(joined) = tasks.join_next().await {
            joined.context("Producer task panicked")?;
        }
        Ok(())
    }

    /// Phase 5 (advisory): provision one sink connector per type, wait for
    /// RUNNING. At least one running connector counts as success.
    async fn connectors(&self) -> bool {
        let record_types = self.config.enabled_record_types();
        let total = record_types.len();

        let mut tasks = JoinSet::new();
        for record_type in record_types {
            let connector = Arc::new(SinkConnector::new(&self.config, record_type));
            tasks.spawn(async move {
                if let Err(e) = connector.create(true).await {
                    tracing::error!(connector = connector.name(), error = %e, "Connector creation failed");
                    return false;
                }
                connector.wait_until_running(RUNNING_TIMEOUT).await
            });
        }

        let mut running = 0usize;
        while let Some(joined) = tasks.join_next().await {
            if matches!(joined, Ok(true)) {
                running += 1;
            }
        }

        if running == total {
            tracing::info!(total, "All connectors are running");
        } else {
            tracing::warn!(running, total, "Not all connectors reached RUNNING");
        }
        running > 0
    }

    /// Phase 6: produce again briefly, give the sink time to settle, then
    /// check that rows arrived. One populated table is enough.
    async fn verification(&self) -> Result<bool> {
        self.run_producers(PRODUCE_DURATION).await?;

        tracing::info!(secs = SINK_SETTLE.as_secs(), "Waiting for sink connectors to settle");
        tokio::time::sleep(SINK_SETTLE).await;

        let db = Arc::new(Database::connect(&self.config).await?);
        let mut tasks = JoinSet::new();
        for record_type in self.config.enabled_record_types() {
            let db = Arc::clone(&db);
            tasks.spawn(async move { (record_type, db.table_count(record_type).await) });
        }

        let mut populated = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let (record_type, count) = joined.context("Table count task panicked")?;
            match count {
                Ok(count) if count > 0 => {
                    tracing::info!(table = record_type.table_name(), count, "Table has data");
                    populated += 1;
                }
                Ok(_) => {
                    tracing::warn!(table = record_type.table_name(), "Table is empty");
                }
                Err(e) => {
                    tracing::error!(table = record_type.table_name(), error = %e, "Count query failed");
                }
            }
        }

        if populated == 0 {
            tracing::error!("No destination table received data");
            return Ok(false);
        }
        tracing::info!(populated, "Data flow verified");
        Ok(true)
    }

    /// Phase 7: channels flush as their producer tasks finish; here only the
    /// optional table truncation remains.
    async fn cleanup(&self) -> Result<()> {
        if !self.config.pipeline.clear_tables {
            tracing::info!("Table clearing disabled, skipping");
            return Ok(());
        }
        let db = Database::connect(&self.config).await?;
        db.truncate_tables(&self.config.enabled_record_types()).await
    }
}

/// One producer task: fire the generator at the configured interval for the
/// given duration, then flush the channel.
async fn drive_producer(
    mut channel: DeliveryChannel,
    mut generator: Box<dyn RecordGenerator>,
    duration: Duration,
    interval: Duration,
) {
    let record_type = channel.record_type();
    let deadline = tokio::time::Instant::now() + duration;
    let mut clock = tokio::time::interval(interval);
    let mut produced = 0usize;

    loop {
        let tick = clock.tick();
        tokio::select! {
            _ = tick => {}
            _ = tokio::time::sleep_until(deadline) => break,
        }
        let record = generator.generate();
        if let Err(e) = channel.produce(&record).await {
            tracing::warn!(record_type = %record_type, error = %e, "Produce failed");
        } else {
            produced += 1;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }

    let unacked = channel.flush(TERMINAL_FLUSH_TIMEOUT).await;
    tracing::info!(record_type = %record_type, produced, unacked, "Producer run finished");
}
